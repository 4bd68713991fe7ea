use crate::config::{PRIMER3_ENV_BIN, Primer3Settings};
use crate::error::{DesignError, DesignResult};
use crate::oracle::{BoulderRecord, OracleRequest, PrimerDesignOracle};
use std::{
    io::{ErrorKind, Write},
    process::{Command, Output, Stdio},
};
use tracing::debug;

#[derive(Debug, Clone, thiserror::Error)]
pub enum Primer3Error {
    #[error("Could not find primer3 executable '{executable}'. Install primer3 or set {env}", env = PRIMER3_ENV_BIN)]
    ToolNotFound { executable: String },
    #[error("primer3 command failed: {executable} (status={status:?}, stderr='{}')", .stderr.trim())]
    ToolFailed {
        executable: String,
        status: Option<i32>,
        stderr: String,
    },
    #[error("{message}")]
    Io { message: String },
}

impl From<Primer3Error> for DesignError {
    fn from(err: Primer3Error) -> Self {
        DesignError::oracle(err.to_string())
    }
}

/// Runs `primer3_core` once per request, feeding Boulder-IO on stdin.
#[derive(Debug, Clone)]
pub struct Primer3Oracle {
    executable: String,
    thermodynamic_parameters_path: Option<String>,
}

impl Primer3Oracle {
    pub fn new(settings: &Primer3Settings) -> Self {
        Self {
            executable: settings.resolved_executable(),
            thermodynamic_parameters_path: settings.thermodynamic_parameters_path.clone(),
        }
    }

    pub fn executable(&self) -> &str {
        &self.executable
    }
}

fn run_primer3(executable: &str, input: &str) -> Result<Output, Primer3Error> {
    let spawn_error = |e: std::io::Error| {
        if e.kind() == ErrorKind::NotFound {
            Primer3Error::ToolNotFound {
                executable: executable.to_string(),
            }
        } else {
            Primer3Error::Io {
                message: format!("Could not run primer3 executable '{executable}': {e}"),
            }
        }
    };
    let mut child = Command::new(executable)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(spawn_error)?;
    {
        let mut stdin = child.stdin.take().ok_or_else(|| Primer3Error::Io {
            message: "primer3 stdin is not available".to_string(),
        })?;
        stdin
            .write_all(input.as_bytes())
            .map_err(|e| Primer3Error::Io {
                message: format!("Could not send request to primer3: {e}"),
            })?;
    }
    child.wait_with_output().map_err(|e| Primer3Error::Io {
        message: format!("Could not read primer3 output: {e}"),
    })
}

impl PrimerDesignOracle for Primer3Oracle {
    fn design(&self, request: &OracleRequest<'_>) -> DesignResult<BoulderRecord> {
        let input = request.to_boulder_io(self.thermodynamic_parameters_path.as_deref());
        debug!(
            sequence_id = request.sequence_id,
            num_return = request.num_return,
            region = %request.ok_region.tag_value(),
            "running primer3"
        );
        let output = run_primer3(&self.executable, &input)?;
        if !output.status.success() {
            return Err(Primer3Error::ToolFailed {
                executable: self.executable.clone(),
                status: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            }
            .into());
        }
        let record = BoulderRecord::parse(&String::from_utf8_lossy(&output.stdout));
        if let Some(err) = record.error() {
            return Err(DesignError::oracle(format!("primer3 rejected the request: {err}")));
        }
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DesignConstraints;
    use crate::error::ErrorCode;
    use crate::oracle::OkRegion;

    fn request(constraints: &DesignConstraints) -> OracleRequest<'_> {
        OracleRequest {
            sequence_id: "demo",
            template: "ACGTACGTACGTACGTACGTACGTACGTACGTACGTACGTACGTACGT",
            ok_region: OkRegion {
                left_start: 0,
                left_len: 24,
                right_start: 24,
                right_len: 24,
            },
            num_return: 2,
            constraints,
            template_alignment: true,
        }
    }

    fn oracle(executable: &str) -> Primer3Oracle {
        Primer3Oracle {
            executable: executable.to_string(),
            thermodynamic_parameters_path: None,
        }
    }

    #[test]
    fn test_missing_executable_is_oracle_error() {
        let constraints = DesignConstraints::default();
        let err = oracle("/nonexistent/primer3_core")
            .design(&request(&constraints))
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::Oracle);
        assert!(err.message.contains("Could not find primer3 executable"));
    }

    #[test]
    fn test_failed_run_message() {
        let err: DesignError = Primer3Error::ToolFailed {
            executable: "primer3_core".to_string(),
            status: Some(255),
            stderr: "PRIMER_ERROR=missing SEQUENCE tag\n".to_string(),
        }
        .into();
        assert_eq!(err.code, ErrorCode::Oracle);
        assert_eq!(
            err.message,
            "primer3 command failed: primer3_core (status=Some(255), stderr='PRIMER_ERROR=missing SEQUENCE tag')"
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_output_without_pairs_is_empty_record() {
        // `cat` echoes the request back: a valid record without any pair.
        let constraints = DesignConstraints::default();
        let record = oracle("cat").design(&request(&constraints)).unwrap();
        assert_eq!(record.get("SEQUENCE_ID"), Some("demo"));
        assert_eq!(record.pairs_returned(), 0);
    }

    #[test]
    fn test_settings_executable_is_used() {
        let settings = Primer3Settings {
            executable: "/usr/local/bin/primer3_core".to_string(),
            thermodynamic_parameters_path: Some("/usr/local/share/primer3_config/".to_string()),
        };
        let oracle = Primer3Oracle::new(&settings);
        if std::env::var(crate::config::PRIMER3_ENV_BIN).is_err() {
            assert_eq!(oracle.executable(), "/usr/local/bin/primer3_core");
        }
    }
}
