//! CLI argument definitions for `polymix-cli`.

use clap::{Arg, ArgAction, Command};

/// Build the CLI argument parser and command definitions.
pub fn build_cli() -> Command {
    Command::new("Polymix Play")
        .version("0.2")
        .about("Mix and play audio files concurrently")
        .arg_required_else_help(true)
        .arg(
            Arg::new("loops")
                .long("loops")
                .short('l')
                .value_name("COUNT")
                .default_value("0")
                .allow_hyphen_values(true)
                .help("Extra playthroughs per file; -1 loops forever"),
        )
        .arg(
            Arg::new("gain")
                .long("gain")
                .short('g')
                .value_name("PCT")
                .default_value("100")
                .help("The playback gain percentage"),
        )
        .arg(
            Arg::new("frequency")
                .long("frequency")
                .short('f')
                .value_name("HZ")
                .default_value("22050")
                .help("Output sample rate"),
        )
        .arg(
            Arg::new("channels")
                .long("channels")
                .short('c')
                .value_name("COUNT")
                .default_value("2")
                .help("Output channel count (1 or 2)"),
        )
        .arg(
            Arg::new("buffer")
                .long("buffer")
                .short('b')
                .value_name("BYTES")
                .default_value("4096")
                .help("Mixing buffer size in bytes"),
        )
        .arg(
            Arg::new("quiet")
                .long("quiet")
                .short('q')
                .action(ArgAction::SetTrue)
                .help("Suppress all console output"),
        )
        .arg(
            Arg::new("FILES")
                .help("Audio files to play together")
                .required(true)
                .num_args(1..),
        )
}
