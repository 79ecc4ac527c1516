//! CLI argument parsing

use clap::Parser;
use itedlb_core::command::AccessPath;
use itedlb_core::{FlashConfig, RetryPolicy, SkipStages};
use std::path::PathBuf;

/// Parse a skip stage name
fn parse_skip(s: &str) -> Result<SkipStages, String> {
    s.parse().map_err(|e: itedlb_core::Error| e.to_string())
}

/// Parse a retry policy name
fn parse_retry_policy(s: &str) -> Result<RetryPolicy, String> {
    s.parse().map_err(|e: itedlb_core::Error| e.to_string())
}

#[derive(Parser, Debug)]
#[command(name = "itedlb")]
#[command(author, version, about = "ITE EC flash tool for the DLB4 download board", long_about = None)]
pub struct Cli {
    /// Image file to flash
    #[arg(short, long)]
    pub filename: Option<PathBuf>,

    /// Skip a verification pass (check = blank check, verify = readback compare)
    #[arg(short, long, value_parser = parse_skip)]
    pub skip: Vec<SkipStages>,

    /// Flash through the SPI pins instead of the EC debug interface
    #[arg(short, long)]
    pub usespi: bool,

    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Which attached board to use (0-indexed)
    #[arg(long, default_value_t = 0)]
    pub device: usize,

    /// Stall retry budget: shared across the exchange or per phase
    #[arg(long, default_value = "shared", value_parser = parse_retry_policy)]
    pub retry_policy: RetryPolicy,

    /// Debug bring-up attempts before giving up on the chip ID
    #[arg(long, default_value_t = itedlb_core::bringup::DEFAULT_POLL_ATTEMPTS)]
    pub poll_attempts: u32,

    /// Leave the EC held after programming instead of resetting it
    #[arg(long)]
    pub no_reset: bool,

    /// Bring the board up, print the IDs and stop
    #[arg(long, conflicts_with = "filename")]
    pub probe: bool,

    /// List attached boards and exit
    #[arg(long)]
    pub list: bool,

    /// Run against the in-memory board emulator
    #[arg(long)]
    pub dummy: bool,
}

impl Cli {
    /// Library settings selected on the command line
    pub fn flash_config(&self) -> FlashConfig {
        FlashConfig {
            path: if self.usespi {
                AccessPath::Spi
            } else {
                AccessPath::Debug
            },
            skip: self
                .skip
                .iter()
                .fold(SkipStages::empty(), |acc, &s| acc | s),
            retry_policy: self.retry_policy,
            poll_attempts: self.poll_attempts,
            reset_after: !self.no_reset,
        }
    }

    /// Whether the run needs a board at all
    pub fn has_work(&self) -> bool {
        self.filename.is_some() || self.probe
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["itedlb", "-f", "ec.bin"]).unwrap();
        assert_eq!(cli.flash_config(), FlashConfig::default());
        assert!(cli.has_work());
    }

    #[test]
    fn test_skip_is_repeatable() {
        let cli =
            Cli::try_parse_from(["itedlb", "-f", "ec.bin", "-s", "check", "-s", "verify"]).unwrap();
        assert_eq!(
            cli.flash_config().skip,
            SkipStages::CHECK | SkipStages::VERIFY
        );
        assert!(Cli::try_parse_from(["itedlb", "-s", "erase"]).is_err());
    }

    #[test]
    fn test_spi_and_tuning() {
        let cli = Cli::try_parse_from([
            "itedlb",
            "-u",
            "--retry-policy",
            "per-phase",
            "--poll-attempts",
            "10",
            "--no-reset",
            "--probe",
        ])
        .unwrap();
        let config = cli.flash_config();
        assert_eq!(config.path, AccessPath::Spi);
        assert_eq!(config.retry_policy, RetryPolicy::PerPhase);
        assert_eq!(config.poll_attempts, 10);
        assert!(!config.reset_after);
        assert!(cli.has_work());
    }

    #[test]
    fn test_no_filename_means_no_work() {
        let cli = Cli::try_parse_from(["itedlb", "-vv"]).unwrap();
        assert_eq!(cli.verbose, 2);
        assert!(!cli.has_work());
    }
}
