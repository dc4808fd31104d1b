// SPDX-License-Identifier: AGPL-3.0

//! Analysis results written by `--json-output`

use gasbound_cfg::CfgSummary;
use gasbound_sevm::ExplorationReport;
use num_bigint::BigUint;
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;

/// Process exit codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exitcode {
    Pass = 0,
    GasLimitExceeded = 1,
    Error = 2,
}

/// Result of one input file
#[derive(Debug, Clone, Serialize)]
pub struct FileResult {
    pub file: PathBuf,
    pub cfg: Option<CfgSummary>,
    pub report: Option<ExplorationReport>,
    /// Set when the file could not be decoded or analysed
    pub error: Option<String>,
    pub exceeds_gas_limit: bool,
    #[serde(with = "humantime_serde")]
    pub duration: Duration,
}

impl FileResult {
    pub fn failed(file: PathBuf, error: String, duration: Duration) -> Self {
        Self {
            file,
            cfg: None,
            report: None,
            error: Some(error),
            exceeds_gas_limit: false,
            duration,
        }
    }

    pub fn max_gas(&self) -> Option<&BigUint> {
        self.report.as_ref().and_then(|r| r.max_gas.as_ref())
    }
}

/// Whole-run result
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    pub exitcode: i32,
    pub gas_limit: u64,
    pub files: Vec<FileResult>,
    #[serde(with = "humantime_serde")]
    pub duration: Duration,
}

impl AnalysisReport {
    pub fn new(gas_limit: u64, files: Vec<FileResult>, duration: Duration) -> Self {
        let exitcode = if files.iter().any(|f| f.error.is_some()) {
            Exitcode::Error
        } else if files.iter().any(|f| f.exceeds_gas_limit) {
            Exitcode::GasLimitExceeded
        } else {
            Exitcode::Pass
        };
        Self {
            exitcode: exitcode as i32,
            gas_limit,
            files,
            duration,
        }
    }

    pub fn failures(&self) -> usize {
        self.files.iter().filter(|f| f.error.is_some()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analysed(file: &str, exceeds: bool) -> FileResult {
        FileResult {
            file: PathBuf::from(file),
            cfg: None,
            report: Some(ExplorationReport::default()),
            error: None,
            exceeds_gas_limit: exceeds,
            duration: Duration::from_millis(5),
        }
    }

    #[test]
    fn test_exitcode_values() {
        assert_eq!(Exitcode::Pass as i32, 0);
        assert_eq!(Exitcode::GasLimitExceeded as i32, 1);
        assert_eq!(Exitcode::Error as i32, 2);
    }

    #[test]
    fn test_exitcode_priority() {
        let report = AnalysisReport::new(100, vec![analysed("a", false)], Duration::ZERO);
        assert_eq!(report.exitcode, 0);

        let report = AnalysisReport::new(100, vec![analysed("a", true)], Duration::ZERO);
        assert_eq!(report.exitcode, 1);

        let report = AnalysisReport::new(
            100,
            vec![
                analysed("a", true),
                FileResult::failed(PathBuf::from("b"), "bad".into(), Duration::ZERO),
            ],
            Duration::ZERO,
        );
        assert_eq!(report.exitcode, 2);
        assert_eq!(report.failures(), 1);
    }

    #[test]
    fn test_json_durations() {
        let report = AnalysisReport::new(100, vec![analysed("a", false)], Duration::from_secs(2));
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["duration"], "2s");
        assert_eq!(json["files"][0]["duration"], "5ms");
        assert!(json["files"][0]["report"]["max_gas"].is_null());
    }
}
