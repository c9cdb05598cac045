use std::process::ExitCode;

pub mod check;
pub mod compare;
pub mod snapshot;

pub mod util;

/// Exit status when a command found failures.
pub const EXIT_FAILURES: u8 = 1;
/// Exit status on operational errors.
pub const EXIT_ERROR: u8 = 2;

/// How a command that ran to completion ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
	Clean,
	Failures,
}

impl Outcome {
	/// `exit_zero` reports failures as a clean run.
	pub fn new(has_failures: bool, exit_zero: bool) -> Self {
		if has_failures && !exit_zero {
			Outcome::Failures
		} else {
			Outcome::Clean
		}
	}

	pub fn exit_code(self) -> ExitCode {
		match self {
			Outcome::Clean => ExitCode::SUCCESS,
			Outcome::Failures => ExitCode::from(EXIT_FAILURES),
		}
	}
}
