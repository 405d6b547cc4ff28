use std::error::Error;
use std::path::Path;
use std::thread::sleep;
use std::time::Duration;

use clap::ArgMatches;
use log::{error, info};
use polymix_lib::{AudioSpec, Mixer};

const POLL_MS: u64 = 100;

pub fn run(args: &ArgMatches) -> Result<i32, Box<dyn Error>> {
    // Primary entry for CLI execution.
    let files: Vec<String> = args
        .get_many::<String>("FILES")
        .map(|values| values.cloned().collect())
        .unwrap_or_default();
    let loops = args.get_one::<String>("loops").unwrap().parse::<i32>()?;
    let gain = args.get_one::<String>("gain").unwrap().parse::<f32>()?;
    let frequency = args
        .get_one::<String>("frequency")
        .unwrap()
        .parse::<u32>()?;
    let channels = args.get_one::<String>("channels").unwrap().parse::<u16>()?;
    let buffer = args.get_one::<String>("buffer").unwrap().parse::<usize>()?;
    let quiet = args.get_flag("quiet");

    for file in &files {
        if !Path::new(file).is_file() {
            error!("no such file: {}", file);
            return Ok(-1);
        }
    }

    let mixer = Mixer::new();
    if files.len() > mixer.get_num_channels() {
        mixer.set_num_channels(files.len());
    }

    let spec = AudioSpec {
        frequency,
        channels,
        buffer,
        ..AudioSpec::default()
    };
    let format = match mixer.init(spec) {
        Some(format) => format,
        None => {
            error!("could not open an audio device at {} Hz", frequency);
            return Ok(-1);
        }
    };
    info!(
        "mixer open: {} Hz, {} channel(s), {} byte buffer",
        format.frequency, format.channels, buffer
    );

    let volume = (gain / 100.0).clamp(0.0, 1.0);
    for file in &files {
        let sound = mixer.sound(file.as_str());
        sound.set_volume(volume);
        if sound.play(loops).is_none() {
            error!("no free channel for {}", file);
            continue;
        }
        if !quiet {
            println!("playing {}", file);
        }
    }

    while mixer.get_busy() {
        sleep(Duration::from_millis(POLL_MS));
    }
    mixer.quit();
    Ok(0)
}
