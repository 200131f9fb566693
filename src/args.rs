//! Command-line parsing and the `Config` it resolves into.
use anyhow::{anyhow, Context};
use clap::Parser;
use std::io::BufRead;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = clap::crate_name!())]
#[command(version = clap::crate_version!())]
#[command(about = clap::crate_description!())]
#[command(author = clap::crate_authors!())]
struct Args {
	/// Path to the encrypted backup file
	#[arg(value_name = "INPUT", required = true)]
	input_file: PathBuf,

	/// Directory to write extracted attachments to. Defaults to a
	/// sibling directory named after the input file.
	#[arg(short = 'o', long = "output-path", value_name = "FOLDER")]
	output_path: Option<PathBuf>,

	/// Verbosity level, one of DEBUG, INFO, WARN, or ERROR
	#[arg(short = 'v', long = "verbosity", value_name = "LEVEL")]
	log_level: Option<String>,

	/// Overwrite existing output files instead of refusing to run
	#[arg(short = 'f', long = "force")]
	force_overwrite: bool,

	/// Treat a bad MAC as a warning instead of a fatal error
	#[arg(long = "no-verify-mac")]
	no_verify_mac: bool,

	/// Tolerate an attachment's declared size running past EOF instead
	/// of treating it as a truncated file
	#[arg(long = "assume-bad-size")]
	assume_bad_size: bool,

	/// Backup passphrase (30 digits, with or without spaces)
	#[arg(short = 'p', long = "password", value_name = "PASSPHRASE", group = "password")]
	password_string: Option<String>,

	/// File to read the backup passphrase from
	#[arg(long = "password-file", value_name = "FILE", group = "password")]
	password_file: Option<PathBuf>,

	/// Read the backup passphrase from the stdout of COMMAND
	#[arg(long = "password-command", value_name = "COMMAND", group = "password")]
	password_command: Option<String>,
}

/// Resolved configuration for a single run: everything `main` needs, with
/// argument parsing, file/command I/O for passphrase sources, and
/// normalisation already done.
pub struct Config {
	pub path_input: PathBuf,
	pub path_output: PathBuf,
	/// Passphrase normalised to its 30 ASCII-digit bytes.
	pub password: Vec<u8>,
	pub stop_on_error: bool,
	pub assume_bad_size: bool,
	pub force_overwrite: bool,
	pub log_level: log::LevelFilter,
}

impl Config {
	/// Parse `std::env::args`, resolve the passphrase source, and
	/// normalise everything into a `Config`.
	pub fn from_args() -> Result<Self, anyhow::Error> {
		let args = Args::parse();

		let input_file = args.input_file;
		let output_path = if let Some(path) = args.output_path {
			path
		} else {
			let stem = input_file
				.file_stem()
				.context("could not determine output path from input file")?
				.to_str()
				.context("output path contains invalid characters")?;
			PathBuf::from(format!("{stem}_export"))
		};

		let raw_password = if let Some(pwd) = args.password_string {
			pwd
		} else if let Some(file_path) = args.password_file {
			let reader = std::io::BufReader::new(
				std::fs::File::open(&file_path).context("unable to open password file")?,
			);
			reader
				.lines()
				.next()
				.context("password file is empty")?
				.context("unable to read from password file")?
		} else if let Some(command) = args.password_command {
			let shell = std::env::var("SHELL").context("could not determine current shell")?;
			let output = std::process::Command::new(shell)
				.arg("-c")
				.arg(command)
				.output()
				.context("failed to execute password command")?;
			if !output.status.success() {
				return Err(anyhow!("password command returned a non-zero exit code"));
			}
			String::from_utf8(output.stdout)
				.context("password command returned invalid UTF-8")?
				.lines()
				.next()
				.context("password command returned an empty line")?
				.to_string()
		} else {
			return Err(anyhow!("no password source given (see --password, --password-file, --password-command)"));
		};
		let password = crate::crypto::normalize_passphrase(&raw_password)
			.map_err(|e| anyhow!("{e}"))?;

		let log_level = match args.log_level.as_deref().map(str::to_lowercase).as_deref() {
			None => log::LevelFilter::Info,
			Some("debug") => log::LevelFilter::Debug,
			Some("info") => log::LevelFilter::Info,
			Some("warn") => log::LevelFilter::Warn,
			Some("error") => log::LevelFilter::Error,
			Some(other) => return Err(anyhow!("unknown log level: {other}")),
		};

		Ok(Self {
			path_input: input_file,
			path_output: output_path,
			password,
			stop_on_error: !args.no_verify_mac,
			assume_bad_size: args.assume_bad_size,
			force_overwrite: args.force_overwrite,
			log_level,
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use clap::Parser;

	#[test]
	fn rejects_more_than_one_password_source() {
		let err = Args::try_parse_from([
			"vaultframe",
			"backup.bak",
			"--password",
			"000000000000000000000000000000",
			"--password-file",
			"pw.txt",
		])
		.unwrap_err();
		assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
	}

	#[test]
	fn accepts_a_single_password_source() {
		let args = Args::try_parse_from([
			"vaultframe",
			"backup.bak",
			"--password",
			"000000000000000000000000000000",
		])
		.unwrap();
		assert_eq!(args.password_string.as_deref(), Some("000000000000000000000000000000"));
		assert!(args.password_file.is_none());
		assert!(args.password_command.is_none());
	}

	#[test]
	fn requires_an_input_file() {
		assert!(Args::try_parse_from(["vaultframe"]).is_err());
	}
}
