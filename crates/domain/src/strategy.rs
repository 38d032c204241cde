// Migration strategies and the step sequences they produce

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How a job copies the VM disks to the target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MigrationStrategy {
    /// Static full-disk export, convert, upload, import
    FullCopy,
    /// Change-block-tracked delta transfer with a final cutover
    Incremental,
}

impl MigrationStrategy {
    /// The ordered step names this strategy runs through.
    ///
    /// The order is the dispatch order; the saga advances positionally
    /// through this list regardless of strategy.
    pub fn step_names(&self) -> &'static [&'static str] {
        match self {
            MigrationStrategy::FullCopy => &[
                "ExportVmdk",
                "ConvertDisk",
                "UploadArtifact",
                "ImportToPve",
                "Verify",
            ],
            MigrationStrategy::Incremental => &[
                "EnableCbt",
                "IncrementalPull",
                "ApplyDelta",
                "FinalSyncCutover",
                "Verify",
            ],
        }
    }
}

impl fmt::Display for MigrationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MigrationStrategy::FullCopy => write!(f, "FULL_COPY"),
            MigrationStrategy::Incremental => write!(f, "INCREMENTAL"),
        }
    }
}

/// The nine step kinds known to the pipeline.
///
/// `StepKind` is the routing key between a dispatched command and the
/// performer that executes it; its wire form is the step name stored on
/// the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StepKind {
    ExportVmdk,
    ConvertDisk,
    UploadArtifact,
    ImportToPve,
    Verify,
    EnableCbt,
    IncrementalPull,
    ApplyDelta,
    FinalSyncCutover,
}

impl StepKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepKind::ExportVmdk => "ExportVmdk",
            StepKind::ConvertDisk => "ConvertDisk",
            StepKind::UploadArtifact => "UploadArtifact",
            StepKind::ImportToPve => "ImportToPve",
            StepKind::Verify => "Verify",
            StepKind::EnableCbt => "EnableCbt",
            StepKind::IncrementalPull => "IncrementalPull",
            StepKind::ApplyDelta => "ApplyDelta",
            StepKind::FinalSyncCutover => "FinalSyncCutover",
        }
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error for unrecognised step names
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
#[error("Unknown step name: {0}")]
pub struct UnknownStepName(pub String);

impl FromStr for StepKind {
    type Err = UnknownStepName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ExportVmdk" => Ok(StepKind::ExportVmdk),
            "ConvertDisk" => Ok(StepKind::ConvertDisk),
            "UploadArtifact" => Ok(StepKind::UploadArtifact),
            "ImportToPve" => Ok(StepKind::ImportToPve),
            "Verify" => Ok(StepKind::Verify),
            "EnableCbt" => Ok(StepKind::EnableCbt),
            "IncrementalPull" => Ok(StepKind::IncrementalPull),
            "ApplyDelta" => Ok(StepKind::ApplyDelta),
            "FinalSyncCutover" => Ok(StepKind::FinalSyncCutover),
            other => Err(UnknownStepName(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_copy_sequence() {
        let names = MigrationStrategy::FullCopy.step_names();
        assert_eq!(
            names,
            &["ExportVmdk", "ConvertDisk", "UploadArtifact", "ImportToPve", "Verify"]
        );
    }

    #[test]
    fn incremental_sequence() {
        let names = MigrationStrategy::Incremental.step_names();
        assert_eq!(
            names,
            &["EnableCbt", "IncrementalPull", "ApplyDelta", "FinalSyncCutover", "Verify"]
        );
    }

    #[test]
    fn both_strategies_have_five_slots() {
        assert_eq!(MigrationStrategy::FullCopy.step_names().len(), 5);
        assert_eq!(MigrationStrategy::Incremental.step_names().len(), 5);
    }

    #[test]
    fn every_step_name_parses_back() {
        for strategy in [MigrationStrategy::FullCopy, MigrationStrategy::Incremental] {
            for name in strategy.step_names() {
                let kind: StepKind = name.parse().unwrap();
                assert_eq!(kind.as_str(), *name);
            }
        }
    }

    #[test]
    fn unknown_step_name_is_rejected() {
        let err = "Teleport".parse::<StepKind>().unwrap_err();
        assert_eq!(err, UnknownStepName("Teleport".to_string()));
    }
}
