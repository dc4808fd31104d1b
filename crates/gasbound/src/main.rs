// SPDX-License-Identifier: AGPL-3.0

//! gasbound - symbolic gas-bound analyzer for EVM bytecode

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use gasbound_cfg::{disassemble, normalize_solc_opcodes, parse_listing, Cfg, Opcode};
use gasbound_config::{Config, InputFormat};
use gasbound_exceptions::{GasboundException, GasboundResult};
use gasbound_logs::{warn_code, ErrorCode};
use gasbound_sevm::{analyze, ExplorationReport, GasClass, PathOutcome, PathReport};
use num_bigint::BigUint;
use rayon::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

mod report;

use report::{AnalysisReport, FileResult};

fn main() -> Result<()> {
    let report = _main()?;
    std::process::exit(report.exitcode)
}

fn _main() -> Result<AnalysisReport> {
    let start_time = Instant::now();
    let config = load_config(Config::parse())?;

    gasbound_logs::init(config.verbose);
    if config.no_color {
        colored::control::set_override(false);
    }

    let analysis = config.analysis();
    analysis.validate()?;

    let files = discover_inputs(&config.paths)?;
    if files.is_empty() {
        anyhow::bail!("no input files given");
    }
    tracing::info!(
        "analysing {} file(s) as {}, solver timeout {}",
        files.len(),
        config.format.name(),
        Config::unparse_timeout(config.solver_timeout)
    );

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.jobs)
        .build()
        .context("Failed to build the worker pool")?;
    let results: Vec<FileResult> =
        pool.install(|| files.par_iter().map(|f| analyze_file(f, &config)).collect());

    for result in &results {
        print_file_result(result, config.gas_limit);
        if let (Some(out), Some(report)) = (&config.ranking_output, &result.report) {
            write_ranking_files(out, &result.file, report)?;
        }
    }

    let report = AnalysisReport::new(config.gas_limit, results, start_time.elapsed());
    print_summary(&report);

    if let Some(path) = &config.json_output {
        let json = serde_json::to_string_pretty(&report)?;
        fs::write(path, json).with_context(|| format!("Failed to write {:?}", path))?;
        println!("Results written to {}", path.display());
    }

    Ok(report)
}

/// Command-line values override the ones of `--config`
fn load_config(cli: Config) -> Result<Config> {
    match &cli.config {
        Some(path) => {
            let mut config = Config::from_file(path)?;
            config.merge(cli);
            Ok(config)
        }
        None => Ok(cli),
    }
}

/// Expand directories to their regular, non-hidden files, sorted by name
fn discover_inputs(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            let mut entries: Vec<PathBuf> = fs::read_dir(path)
                .with_context(|| format!("Failed to read directory {:?}", path))?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|p| p.is_file())
                .filter(|p| {
                    !p.file_name()
                        .and_then(|n| n.to_str())
                        .is_some_and(|n| n.starts_with('.'))
                })
                .collect();
            entries.sort();
            files.extend(entries);
        } else if path.is_file() {
            files.push(path.clone());
        } else {
            anyhow::bail!("Input not found: {:?}", path);
        }
    }
    Ok(files)
}

fn decode(text: &str, format: InputFormat) -> GasboundResult<Vec<Opcode>> {
    match format {
        InputFormat::Listing => parse_listing(text),
        InputFormat::SolcOpcodes => normalize_solc_opcodes(text),
        InputFormat::Bytecode => disassemble(text.trim()),
    }
}

fn analyze_file(file: &Path, config: &Config) -> FileResult {
    let start = Instant::now();
    let text = match fs::read_to_string(file) {
        Ok(text) => text,
        Err(err) => {
            tracing::error!("{}: {}", file.display(), err);
            return FileResult::failed(file.to_path_buf(), err.to_string(), start.elapsed());
        }
    };

    let result = decode(&text, config.format)
        .and_then(|opcodes| Cfg::from_opcodes(&opcodes))
        .and_then(|cfg| {
            let summary = cfg.summary();
            tracing::debug!("{}: {}", file.display(), summary);
            analyze(&cfg, &config.analysis()).map(|report| (summary, report))
        });

    match result {
        Ok((summary, report)) => {
            let limit = BigUint::from(config.gas_limit);
            let exceeds_gas_limit = report.max_gas.as_ref().is_some_and(|gas| *gas > limit);
            FileResult {
                file: file.to_path_buf(),
                cfg: Some(summary),
                report: Some(report),
                error: None,
                exceeds_gas_limit,
                duration: start.elapsed(),
            }
        }
        Err(err) => {
            let code = match err {
                GasboundException::Parse { .. } => ErrorCode::ParsingError,
                _ => ErrorCode::InternalError,
            };
            warn_code(code, &format!("{}: {}", file.display(), err));
            FileResult::failed(file.to_path_buf(), err.to_string(), start.elapsed())
        }
    }
}

/// `<out>/<file stem>/ranking/<header>.fc` for every loop with a ranking form
fn write_ranking_files(out: &Path, file: &Path, report: &ExplorationReport) -> Result<Vec<PathBuf>> {
    let stem = file
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("input");
    let dir = out.join(stem).join("ranking");

    let mut written = Vec::new();
    for path in &report.paths {
        for ranking in path.loops.iter().filter_map(|l| l.ranking.as_ref()) {
            fs::create_dir_all(&dir).with_context(|| format!("Failed to create {:?}", dir))?;
            let target = dir.join(ranking.file_name());
            fs::write(&target, ranking.render())
                .with_context(|| format!("Failed to write {:?}", target))?;
            if !written.contains(&target) {
                written.push(target);
            }
        }
    }
    Ok(written)
}

fn class_label(class: GasClass) -> colored::ColoredString {
    match class {
        GasClass::Constant => class.to_string().green(),
        GasClass::Bound => class.to_string().yellow(),
        GasClass::Unbound => class.to_string().red(),
    }
}

fn path_line(path: &PathReport) -> String {
    let tags: Vec<String> = path.tags.iter().map(|t| t.to_string()).collect();
    let outcome = match &path.outcome {
        PathOutcome::Solved { class, gas, .. } => format!("{} {} gas", class_label(*class), gas),
        PathOutcome::Infeasible => "infeasible".dimmed().to_string(),
        PathOutcome::Unbound { reason } => format!("{} ({})", class_label(GasClass::Unbound), reason),
    };
    format!("  path {:>3} [{}] {}", path.id, tags.join(" -> "), outcome)
}

fn print_file_result(result: &FileResult, gas_limit: u64) {
    println!("\n{} {}", "Analysing".green(), result.file.display().to_string().cyan());
    if let Some(err) = &result.error {
        println!("  {} {}", "error:".red().bold(), err);
        return;
    }
    if let Some(summary) = &result.cfg {
        println!("  {}", summary);
    }
    let Some(report) = &result.report else {
        return;
    };
    for path in &report.paths {
        println!("{}", path_line(path));
    }
    for (kind, count) in report.dropped_counts() {
        println!("  {} {} path(s): {}", "dropped".yellow(), count, kind);
    }
    match &report.max_gas {
        Some(gas) => {
            print!("  max gas: {}", gas.to_string().bold());
            if result.exceeds_gas_limit {
                print!(" {}", format!("exceeds gas limit {}", gas_limit).red());
            }
            println!();
        }
        None => println!("  max gas: {}", "none".dimmed()),
    }
}

fn print_summary(report: &AnalysisReport) {
    let analysed = report.files.len() - report.failures();
    let exceeding = report.files.iter().filter(|f| f.exceeds_gas_limit).count();
    println!(
        "\n{} {} file(s), {} {}, {} {}, {} {} ({}ms)",
        "Summary:".yellow().bold(),
        report.files.len(),
        analysed,
        "analysed".green(),
        report.failures().to_string().red(),
        "failed".red(),
        exceeding,
        "over the gas limit",
        report.duration.as_millis()
    );
}
