mod args;
mod attachment;
mod byte_source;
mod crypto;
mod error;
mod frame;
mod output;
mod reader;
mod resync;
mod session;

use anyhow::{anyhow, Context};
use log::{error, info, warn};

use byte_source::FileSource;
use frame::Frame;
use output::OutputWriter;
use reader::{read_header, FrameReader, ReadOutcome};
use session::Session;

fn run(config: &args::Config) -> Result<(), anyhow::Error> {
    let mut source = FileSource::open(&config.path_input)
        .with_context(|| format!("could not open {}", config.path_input.display()))?;

    let header = read_header(&mut source)?;
    let (salt, iv_seed_vec) = match &header {
        Frame::Header { salt, iv_seed } => (salt.clone(), iv_seed.clone()),
        _ => unreachable!("read_header guarantees a Header frame"),
    };
    if iv_seed_vec.len() != 16 {
        return Err(anyhow!("header IV seed is not 16 bytes"));
    }
    let mut iv_seed = [0u8; 16];
    iv_seed.copy_from_slice(&iv_seed_vec);

    let (cipher_key, mac_key) = crypto::derive_backup_keys(&config.password, &salt)
        .map_err(|e| anyhow!("{e}"))?;

    let session = Session::new(
        config.path_input.clone(),
        cipher_key,
        mac_key.to_vec(),
        iv_seed,
        config.stop_on_error,
        config.assume_bad_size,
        log::log_enabled!(log::Level::Debug),
    );
    let mut reader = FrameReader::new(source, session, header);
    let mut output = OutputWriter::new(config.path_output.clone(), config.force_overwrite)?;

    let started = std::time::Instant::now();
    loop {
        match reader.next()? {
            ReadOutcome::EndOfStream => break,
            ReadOutcome::InvalidFrame => {
                warn!("frame did not parse despite a good MAC; stream may be corrupt");
                continue;
            }
            ReadOutcome::Frame(frame) => {
                output.record_frame(frame.frame_type());
                write_attachment_if_present(&mut output, &frame)?;
            }
        }
    }

    info!("finished in {:.1}s", started.elapsed().as_secs_f64());
    for line in output.summary_lines() {
        info!("{line}");
    }
    Ok(())
}

fn write_attachment_if_present(output: &mut OutputWriter, frame: &Frame) -> Result<(), anyhow::Error> {
    let (name, descriptor) = match frame {
        Frame::Attachment {
            row_id,
            attachment_id,
            descriptor,
            ..
        } => (format!("attachment_{row_id}_{attachment_id}"), descriptor),
        Frame::Avatar {
            name, descriptor, ..
        } => (format!("avatar_{name}"), descriptor),
        Frame::Sticker {
            row_id, descriptor, ..
        } => (format!("sticker_{row_id}"), descriptor),
        _ => return Ok(()),
    };
    let Some(descriptor) = descriptor else {
        return Ok(());
    };
    let bytes = descriptor.decrypt()?;
    output.write_blob(&name, &bytes)?;
    Ok(())
}

fn main() {
    let config = args::Config::from_args().unwrap_or_else(|e| {
        eprintln!("problem parsing arguments: {e}");
        std::process::exit(1);
    });

    simplelog::TermLogger::init(
        config.log_level,
        simplelog::Config::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    )
    .expect("could not initialise logger");

    if let Err(e) = run(&config) {
        error!("{e:#}");
        std::process::exit(1);
    }
}
