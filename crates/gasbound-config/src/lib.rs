// SPDX-License-Identifier: AGPL-3.0

//! Configuration management for gasbound
//!
//! Command-line options and TOML config files both land in [`Config`]. The
//! analysis engine never sees `Config` directly: it receives the plain
//! [`AnalysisConfig`] produced by [`Config::analysis`].

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use gasbound_constants::{
    DEFAULT_GAS_STEP, DEFAULT_LOOP_BOUND, DEFAULT_MAX_DEPTH, DEFAULT_MAX_PATHS,
    DEFAULT_MAX_SEARCH_ROUNDS, DEFAULT_MAX_UNROLL, DEFAULT_SOLVER_TIMEOUT_MS, GAS_LIMIT_DEFAULT,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// How input files are decoded into opcodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InputFormat {
    /// `<offset>: <MNEMONIC> [0x<operand>]` per line
    Listing,
    /// Whitespace-separated `solc --opcodes` output
    SolcOpcodes,
    /// Hex-encoded runtime bytecode
    Bytecode,
}

impl InputFormat {
    pub fn name(&self) -> &'static str {
        match self {
            InputFormat::Listing => "listing",
            InputFormat::SolcOpcodes => "solc-opcodes",
            InputFormat::Bytecode => "bytecode",
        }
    }
}

impl std::str::FromStr for InputFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "listing" => Ok(InputFormat::Listing),
            "solc-opcodes" | "solc" => Ok(InputFormat::SolcOpcodes),
            "bytecode" | "hex" => Ok(InputFormat::Bytecode),
            _ => Err(anyhow::anyhow!("Invalid input format: {}", s)),
        }
    }
}

/// Main gasbound configuration
#[derive(Debug, Clone, Parser, Serialize, Deserialize)]
#[clap(
    name = "gasbound",
    version,
    about = "Symbolic gas-bound analyzer for EVM bytecode"
)]
pub struct Config {
    /// Input files or directories
    #[clap(value_name = "PATH")]
    #[serde(default)]
    pub paths: Vec<PathBuf>,

    /// Path to the config file
    #[clap(long)]
    pub config: Option<PathBuf>,

    /// Input encoding
    #[clap(long, value_enum, default_value = "listing")]
    #[serde(default = "default_format")]
    pub format: InputFormat,

    /// Gas limit used to flag expensive contracts
    #[clap(long, default_value_t = GAS_LIMIT_DEFAULT)]
    #[serde(default = "default_gas_limit")]
    pub gas_limit: u64,

    /// Solver timeout per check, e.g. `500ms`, `10s` (plain numbers are ms)
    #[clap(long, default_value = "10000", value_parser = parse_timeout_arg)]
    #[serde(default = "default_solver_timeout")]
    pub solver_timeout: u32,

    /// Unsigned upper bound of loop counter variables
    #[clap(long, default_value_t = DEFAULT_LOOP_BOUND)]
    #[serde(default = "default_loop_bound")]
    pub loop_bound: u64,

    /// Threshold increment of the gas-bound search
    #[clap(long, default_value_t = DEFAULT_GAS_STEP)]
    #[serde(default = "default_gas_step")]
    pub gas_step: u64,

    /// Starting threshold of the gas-bound search
    #[clap(long, default_value_t = 0)]
    #[serde(default)]
    pub lower_bound: u64,

    /// Maximum number of nodes per path
    #[clap(long, default_value_t = DEFAULT_MAX_DEPTH)]
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,

    /// Maximum number of explored paths
    #[clap(long, default_value_t = DEFAULT_MAX_PATHS)]
    #[serde(default = "default_max_paths")]
    pub max_paths: usize,

    /// Loop header occurrences tolerated before giving up on a loop
    #[clap(long, default_value_t = DEFAULT_MAX_UNROLL)]
    #[serde(default = "default_max_unroll")]
    pub max_unroll: usize,

    /// Maximum rounds of the gas-bound search
    #[clap(long, default_value_t = DEFAULT_MAX_SEARCH_ROUNDS)]
    #[serde(default = "default_max_search_rounds")]
    pub max_search_rounds: usize,

    /// Number of files analysed in parallel (0 = available cores)
    #[clap(long, short = 'j', default_value_t = 0)]
    #[serde(default)]
    pub jobs: usize,

    /// Write results to a JSON file
    #[clap(long)]
    pub json_output: Option<PathBuf>,

    /// Directory for ranking-function artifacts
    #[clap(long)]
    pub ranking_output: Option<PathBuf>,

    /// Increase verbosity (-v info, -vv debug, -vvv trace)
    #[clap(long, short = 'v', action = clap::ArgAction::Count)]
    #[serde(default)]
    pub verbose: u8,

    /// Disable colored console output
    #[clap(long)]
    #[serde(default)]
    pub no_color: bool,
}

// Default value functions
fn default_format() -> InputFormat {
    InputFormat::Listing
}

fn default_gas_limit() -> u64 {
    GAS_LIMIT_DEFAULT
}

fn default_solver_timeout() -> u32 {
    DEFAULT_SOLVER_TIMEOUT_MS
}

fn default_loop_bound() -> u64 {
    DEFAULT_LOOP_BOUND
}

fn default_gas_step() -> u64 {
    DEFAULT_GAS_STEP
}

fn default_max_depth() -> usize {
    DEFAULT_MAX_DEPTH
}

fn default_max_paths() -> usize {
    DEFAULT_MAX_PATHS
}

fn default_max_unroll() -> usize {
    DEFAULT_MAX_UNROLL
}

fn default_max_search_rounds() -> usize {
    DEFAULT_MAX_SEARCH_ROUNDS
}

impl Default for Config {
    fn default() -> Self {
        Self {
            paths: Vec::new(),
            config: None,
            format: default_format(),
            gas_limit: default_gas_limit(),
            solver_timeout: default_solver_timeout(),
            loop_bound: default_loop_bound(),
            gas_step: default_gas_step(),
            lower_bound: 0,
            max_depth: default_max_depth(),
            max_paths: default_max_paths(),
            max_unroll: default_max_unroll(),
            max_search_rounds: default_max_search_rounds(),
            jobs: 0,
            json_output: None,
            ranking_output: None,
            verbose: 0,
            no_color: false,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Keys live under a `[global]` table and may be written in kebab-case
    /// or snake_case.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let parsed: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        parsed
            .to_config()
            .with_context(|| format!("Invalid config file: {:?}", path))
    }

    /// Override values in `self` with the non-default values of `other`
    pub fn merge(&mut self, other: Self) {
        if !other.paths.is_empty() {
            self.paths = other.paths;
        }
        if other.config.is_some() {
            self.config = other.config;
        }
        if other.format != default_format() {
            self.format = other.format;
        }
        if other.gas_limit != default_gas_limit() {
            self.gas_limit = other.gas_limit;
        }
        if other.solver_timeout != default_solver_timeout() {
            self.solver_timeout = other.solver_timeout;
        }
        if other.loop_bound != default_loop_bound() {
            self.loop_bound = other.loop_bound;
        }
        if other.gas_step != default_gas_step() {
            self.gas_step = other.gas_step;
        }
        if other.lower_bound > 0 {
            self.lower_bound = other.lower_bound;
        }
        if other.max_depth != default_max_depth() {
            self.max_depth = other.max_depth;
        }
        if other.max_paths != default_max_paths() {
            self.max_paths = other.max_paths;
        }
        if other.max_unroll != default_max_unroll() {
            self.max_unroll = other.max_unroll;
        }
        if other.max_search_rounds != default_max_search_rounds() {
            self.max_search_rounds = other.max_search_rounds;
        }
        if other.jobs > 0 {
            self.jobs = other.jobs;
        }
        if other.json_output.is_some() {
            self.json_output = other.json_output;
        }
        if other.ranking_output.is_some() {
            self.ranking_output = other.ranking_output;
        }
        if other.verbose > 0 {
            self.verbose = other.verbose;
        }
        if other.no_color {
            self.no_color = true;
        }
    }

    /// Engine-facing settings
    pub fn analysis(&self) -> AnalysisConfig {
        AnalysisConfig {
            solver_timeout_ms: self.solver_timeout,
            loop_bound: self.loop_bound,
            gas_step: self.gas_step,
            lower_bound: self.lower_bound,
            max_depth: self.max_depth,
            max_paths: self.max_paths,
            max_unroll: self.max_unroll,
            max_search_rounds: self.max_search_rounds,
        }
    }

    pub fn unparse_timeout(timeout_ms: u32) -> String {
        if timeout_ms >= 1000 && timeout_ms % 1000 == 0 {
            format!("{}s", timeout_ms / 1000)
        } else {
            format!("{}ms", timeout_ms)
        }
    }
}

/// Settings consumed by the exploration engine and the gas-bound search
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisConfig {
    pub solver_timeout_ms: u32,
    /// Exclusive upper bound of every loop counter
    pub loop_bound: u64,
    pub gas_step: u64,
    pub lower_bound: u64,
    pub max_depth: usize,
    pub max_paths: usize,
    /// Occurrences of one loop header allowed before synthesis must succeed
    pub max_unroll: usize,
    pub max_search_rounds: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            solver_timeout_ms: DEFAULT_SOLVER_TIMEOUT_MS,
            loop_bound: DEFAULT_LOOP_BOUND,
            gas_step: DEFAULT_GAS_STEP,
            lower_bound: 0,
            max_depth: DEFAULT_MAX_DEPTH,
            max_paths: DEFAULT_MAX_PATHS,
            max_unroll: DEFAULT_MAX_UNROLL,
            max_search_rounds: DEFAULT_MAX_SEARCH_ROUNDS,
        }
    }
}

impl AnalysisConfig {
    pub fn validate(&self) -> Result<()> {
        if self.gas_step == 0 {
            anyhow::bail!("gas step must be positive");
        }
        if self.loop_bound < 2 {
            anyhow::bail!("loop bound must be at least 2, got {}", self.loop_bound);
        }
        if self.max_search_rounds == 0 {
            anyhow::bail!("max search rounds must be positive");
        }
        if self.max_unroll < 2 {
            anyhow::bail!("max unroll must be at least 2, got {}", self.max_unroll);
        }
        if self.max_depth == 0 || self.max_paths == 0 {
            anyhow::bail!("exploration ceilings must be positive");
        }
        Ok(())
    }
}

/// TOML configuration structure (for parsing from file)
#[derive(Debug, Deserialize)]
struct TomlConfig {
    #[serde(default)]
    global: HashMap<String, toml::Value>,
}

impl TomlConfig {
    fn to_config(self) -> Result<Config> {
        let mut config = Config::default();

        for (key, value) in self.global {
            let key = key.replace('-', "_");

            match key.as_str() {
                "paths" => {
                    config.paths = value
                        .as_array()
                        .ok_or_else(|| anyhow::anyhow!("Expected array, got {:?}", value))?
                        .iter()
                        .map(parse_toml_path)
                        .collect::<Result<_>>()?
                }
                "format" => config.format = parse_toml_string(&value)?.parse()?,
                "gas_limit" => config.gas_limit = parse_toml_u64(&value)?,
                "solver_timeout" => {
                    config.solver_timeout = match value.as_str() {
                        Some(s) => parse_timeout_arg(s).map_err(|e| anyhow::anyhow!(e))?,
                        None => u32::try_from(parse_toml_u64(&value)?)?,
                    }
                }
                "loop_bound" => config.loop_bound = parse_toml_u64(&value)?,
                "gas_step" => config.gas_step = parse_toml_u64(&value)?,
                "lower_bound" => config.lower_bound = parse_toml_u64(&value)?,
                "max_depth" => config.max_depth = parse_toml_usize(&value)?,
                "max_paths" => config.max_paths = parse_toml_usize(&value)?,
                "max_unroll" => config.max_unroll = parse_toml_usize(&value)?,
                "max_search_rounds" => config.max_search_rounds = parse_toml_usize(&value)?,
                "jobs" => config.jobs = parse_toml_usize(&value)?,
                "json_output" => config.json_output = Some(parse_toml_path(&value)?),
                "ranking_output" => config.ranking_output = Some(parse_toml_path(&value)?),
                "verbose" => config.verbose = parse_toml_u8(&value)?,
                "no_color" => config.no_color = parse_toml_bool(&value)?,
                _ => anyhow::bail!("Unknown config key: {}", key),
            }
        }

        Ok(config)
    }
}

fn parse_toml_string(value: &toml::Value) -> Result<String> {
    value
        .as_str()
        .map(|s| s.to_string())
        .ok_or_else(|| anyhow::anyhow!("Expected string, got {:?}", value))
}

fn parse_toml_bool(value: &toml::Value) -> Result<bool> {
    value
        .as_bool()
        .ok_or_else(|| anyhow::anyhow!("Expected bool, got {:?}", value))
}

fn parse_toml_usize(value: &toml::Value) -> Result<usize> {
    value
        .as_integer()
        .and_then(|i| usize::try_from(i).ok())
        .ok_or_else(|| anyhow::anyhow!("Expected usize, got {:?}", value))
}

fn parse_toml_u8(value: &toml::Value) -> Result<u8> {
    value
        .as_integer()
        .and_then(|i| u8::try_from(i).ok())
        .ok_or_else(|| anyhow::anyhow!("Expected u8, got {:?}", value))
}

fn parse_toml_u64(value: &toml::Value) -> Result<u64> {
    value
        .as_integer()
        .and_then(|i| u64::try_from(i).ok())
        .ok_or_else(|| anyhow::anyhow!("Expected u64, got {:?}", value))
}

fn parse_toml_path(value: &toml::Value) -> Result<PathBuf> {
    Ok(PathBuf::from(parse_toml_string(value)?))
}

/// Parse time string with unit support
/// Supports: "100ms", "5s", "2m", "1h", or plain numbers (default_unit)
pub fn parse_time(time_str: &str, default_unit: &str) -> Result<u64> {
    let time_str = time_str.trim();

    if let Some(num_str) = time_str.strip_suffix("ms") {
        return Ok(num_str.trim().parse::<u64>()?);
    }
    if let Some(num_str) = time_str.strip_suffix('s') {
        return Ok(num_str.trim().parse::<u64>()? * 1000);
    }
    if let Some(num_str) = time_str.strip_suffix('m') {
        return Ok(num_str.trim().parse::<u64>()? * 60 * 1000);
    }
    if let Some(num_str) = time_str.strip_suffix('h') {
        return Ok(num_str.trim().parse::<u64>()? * 60 * 60 * 1000);
    }

    let value = time_str.parse::<u64>()?;
    match default_unit {
        "ms" => Ok(value),
        "s" => Ok(value * 1000),
        "m" => Ok(value * 60 * 1000),
        "h" => Ok(value * 60 * 60 * 1000),
        _ => Err(anyhow::anyhow!("Invalid default unit: {}", default_unit)),
    }
}

/// clap value parser for timeouts in milliseconds
fn parse_timeout_arg(s: &str) -> std::result::Result<u32, String> {
    let ms = parse_time(s, "ms").map_err(|e| format!("invalid timeout {:?}: {}", s, e))?;
    u32::try_from(ms).map_err(|_| format!("timeout {:?} is too large", s))
}
