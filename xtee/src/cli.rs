// Copyright 2021-Present
// SPDX-License-Identifier: Apache-2.0

//! Argument parsing, usage text, and the flag-to-`Config` mapping. Kept
//! entirely out of `xtee-core` per spec §1 ("argument parsing and usage text"
//! is named as an external collaborator). Built with clap's builder API
//! (`command!()` + `Arg::new(...)`) rather than the derive macros, matching
//! the style of this pack's own CLI binary (`datadog-profiling-replayer`).

use clap::{command, Arg, ArgAction};
use xtee_core::config::Config;
use xtee_core::qos::QosConfig;

/// Default verbosity bitmask when `-v` is not given (`TRACE | ERROR`).
pub use xtee_core::config::DEFAULT_LOGFLAGS;

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("{0}")]
    Parse(String),
}

/// The two ways argument parsing can conclude. Spec §9 calls out a bug in
/// the original where one control path in `init()` falls through without
/// returning a value before exit; this enum exists so every branch of
/// `parse` returns something concrete and there is no such path here.
pub enum CliOutcome {
    Run(Config),
    HelpShown,
}

fn build_command() -> clap::Command {
    command!()
        .arg(
            Arg::new("command")
                .short('c')
                .value_name("CMD")
                .help("declare a child command (repeatable, 1-based declaration order)")
                .action(ArgAction::Append),
        )
        .arg(
            Arg::new("link")
                .short('l')
                .value_name("DEST:SRC")
                .help("declare a link between endpoints, e.g. 2:1.1 (repeatable)")
                .action(ArgAction::Append),
        )
        .arg(
            Arg::new("no-out-file")
                .short('n')
                .help("suppress default output file")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("append")
                .short('a')
                .help("append mode")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("kbps")
                .short('s')
                .value_name("KBPS")
                .help("bitrate ceiling in kilobits/second (minimum meaningful value is 8)"),
        )
        .arg(
            Arg::new("skip-bytes")
                .short('k')
                .value_name("BYTES")
                .help("leading bytes of harness input to skip"),
        )
        .arg(
            Arg::new("skip-seconds")
                .short('t')
                .value_name("SECS")
                .help("leading seconds of harness input to skip"),
        )
        .arg(
            Arg::new("duration")
                .short('d')
                .value_name("SECS")
                .help("hard run duration in seconds"),
        )
        .arg(
            Arg::new("timeout")
                .short('q')
                .value_name("SECS")
                .help("inactivity timeout in seconds"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .value_name("LEVEL")
                .help("log category bitmask (TRACE=1, ERROR=2); default 4"),
        )
        .disable_version_flag(true)
}

fn parse_u64(matches: &clap::ArgMatches, id: &str, spec: &str) -> Result<u64, CliError> {
    match matches.get_one::<String>(id) {
        Some(raw) => raw
            .parse()
            .map_err(|_| CliError::Parse(format!("{spec} expects an integer, got {raw:?}"))),
        None => Ok(0),
    }
}

/// Parses `args` (the full `argv`, including `argv[0]`). Returns
/// [`CliOutcome::HelpShown`] when `-h`/`--help` was requested — the caller
/// maps that to exit code `0` without ever running the engine.
pub fn parse<I, T>(args: I) -> Result<CliOutcome, CliError>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    let command = build_command();
    let matches = match command.try_get_matches_from(args) {
        Ok(matches) => matches,
        Err(err) if matches!(
            err.kind(),
            clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
        ) => {
            print!("{err}");
            return Ok(CliOutcome::HelpShown);
        }
        Err(err) => return Err(CliError::Parse(err.to_string())),
    };

    let commands: Vec<String> = matches
        .get_many::<String>("command")
        .map(|values| values.cloned().collect())
        .unwrap_or_default();
    let link_specs: Vec<String> = matches
        .get_many::<String>("link")
        .map(|values| values.cloned().collect())
        .unwrap_or_default();

    let kbps = parse_u64(&matches, "kbps", "-s")?;
    let bytes_to_skip = parse_u64(&matches, "skip-bytes", "-k")?;
    let secs_to_skip = parse_u64(&matches, "skip-seconds", "-t")?;
    let secs_duration = parse_u64(&matches, "duration", "-d")?;
    let secs_timeout = parse_u64(&matches, "timeout", "-q")?;
    let logflags = match matches.get_one::<String>("verbose") {
        Some(raw) => raw
            .parse()
            .map_err(|_| CliError::Parse(format!("-v expects an integer, got {raw:?}")))?,
        None => DEFAULT_LOGFLAGS,
    };

    Ok(CliOutcome::Run(Config {
        commands,
        link_specs,
        no_out_file: matches.get_flag("no-out-file"),
        append: matches.get_flag("append"),
        secs_timeout,
        logflags,
        qos: QosConfig {
            bytes_to_skip,
            secs_to_skip,
            secs_duration,
            // `-s` is kilobits/second; the controller works in kilobytes/second.
            kbps_limit: kbps >> 3,
        },
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_config(args: &[&str]) -> Config {
        let mut full = vec!["xtee"];
        full.extend_from_slice(args);
        match parse(full).expect("parse should succeed") {
            CliOutcome::Run(config) => config,
            CliOutcome::HelpShown => panic!("expected Run, got HelpShown"),
        }
    }

    #[test]
    fn collects_repeated_c_and_l_flags_in_order() {
        let config = run_config(&["-c", "cat", "-c", "grep x", "-l", "2:1.1"]);
        assert_eq!(config.commands, vec!["cat", "grep x"]);
        assert_eq!(config.link_specs, vec!["2:1.1"]);
    }

    #[test]
    fn kbps_flag_is_shifted_down_to_kilobytes_per_second() {
        let config = run_config(&["-s", "8000"]);
        assert_eq!(config.qos.kbps_limit, 1000);
    }

    #[test]
    fn verbose_defaults_to_trace_and_error_bitmask() {
        let config = run_config(&[]);
        assert_eq!(config.logflags, DEFAULT_LOGFLAGS);
    }

    #[test]
    fn help_flag_short_circuits_without_spawning_anything() {
        let outcome = parse(vec!["xtee", "-h"]).expect("help should parse cleanly");
        assert!(matches!(outcome, CliOutcome::HelpShown));
    }

    #[test]
    fn non_integer_duration_is_a_parse_error() {
        let result = parse(vec!["xtee", "-d", "not-a-number"]);
        assert!(result.is_err());
    }
}
