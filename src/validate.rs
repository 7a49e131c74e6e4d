//! Runs the user-supplied validation command against changed paths.
//!
//! The command line is the configured program plus its fixed arguments, with
//! the changed paths appended as the final arguments. Exit 0 passes; any
//! other exit (or a timeout) fails the pick and triggers rollback. Output is
//! captured for reporting, never streamed.

use std::{path::Path, process::Command, time::Duration};

use crate::{
    errors::PickError,
    utils::{CancelFlag, CommandOutput, run_with_timeout},
};

pub struct ValidationRunner {
    command: Vec<String>,
    timeout: Duration,
    cancel: CancelFlag,
}

impl ValidationRunner {
    /// `command` is the program followed by its fixed arguments.
    pub fn new(command: Vec<String>, timeout: Duration, cancel: CancelFlag) -> Self {
        Self {
            command,
            timeout,
            cancel,
        }
    }

    /// Run the command with `paths` appended, in `workdir`.
    ///
    /// Returns the captured output on exit 0 and `ValidationFailed`
    /// otherwise; the caller owns the rollback.
    pub fn run(&self, workdir: &Path, paths: &[String]) -> Result<CommandOutput, PickError> {
        let Some((program, fixed_args)) = self.command.split_first() else {
            return Err(PickError::InvalidConfig(
                "validation command is empty".to_string(),
            ));
        };

        let mut cmd = Command::new(program);
        cmd.current_dir(workdir).args(fixed_args).args(paths);

        tracing::debug!("validating {} path(s) with `{program}`", paths.len());
        let output = run_with_timeout(cmd, self.timeout, &self.cancel)?;
        if output.success() {
            Ok(output)
        } else {
            Err(PickError::ValidationFailed {
                command: self.command.join(" "),
                status: output.status,
                stdout: output.stdout,
                stderr: output.stderr,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    fn runner(command: &[&str]) -> ValidationRunner {
        ValidationRunner::new(
            command.iter().map(|s| s.to_string()).collect(),
            Duration::from_secs(10),
            CancelFlag::new(),
        )
    }

    #[test]
    fn paths_are_appended_after_fixed_args() {
        let tmp = tempdir().unwrap();
        let out = runner(&["echo", "checking"])
            .run(tmp.path(), &["a.c".to_string(), "b.c".to_string()])
            .unwrap();
        assert_eq!(out.stdout, "checking a.c b.c\n");
    }

    #[test]
    fn nonzero_exit_maps_to_validation_failed() {
        let tmp = tempdir().unwrap();
        let err = runner(&["sh", "-c", "echo broken >&2; exit 7"])
            .run(tmp.path(), &[])
            .unwrap_err();
        match err {
            PickError::ValidationFailed { status, stderr, .. } => {
                assert_eq!(status, 7);
                assert_eq!(stderr, "broken\n");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn empty_command_is_a_config_error() {
        let tmp = tempdir().unwrap();
        let err = runner(&[]).run(tmp.path(), &[]).unwrap_err();
        assert!(matches!(err, PickError::InvalidConfig(_)));
    }
}
