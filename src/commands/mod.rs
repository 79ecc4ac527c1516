//! CLI command implementations
//!
//! Every command runs against any [`BulkPipe`]. The backend is picked here:
//! the USB board by default, or the in-memory emulator with `--dummy`.

mod flash;
mod list;

pub use list::list_boards;

use crate::cli::Cli;
use itedlb_core::{BulkPipe, FlashImage};

/// Run the probe or flash command on an already opened pipe
fn run_on<P: BulkPipe>(
    pipe: P,
    cli: &Cli,
    image: Option<&FlashImage>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = cli.flash_config();
    match image {
        Some(image) => flash::run_flash(pipe, &config, image),
        None => flash::run_probe(pipe, &config),
    }
}

/// Load the image, then open the selected backend and run the requested command
///
/// The image is read before any backend is opened, so a bad path never
/// claims the board.
pub fn run(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    let image = cli
        .filename
        .as_deref()
        .map(flash::load_image)
        .transpose()?;

    if cli.dummy {
        return run_dummy(cli, image.as_ref());
    }
    run_usb(cli, image.as_ref())
}

#[cfg(feature = "dummy")]
fn run_dummy(cli: &Cli, image: Option<&FlashImage>) -> Result<(), Box<dyn std::error::Error>> {
    log::info!("Using in-memory board emulator");
    run_on(itedlb_dummy::DummyBoard::new_default(), cli, image)
}

#[cfg(not(feature = "dummy"))]
fn run_dummy(_cli: &Cli, _image: Option<&FlashImage>) -> Result<(), Box<dyn std::error::Error>> {
    Err("built without the dummy backend".into())
}

#[cfg(feature = "usb")]
fn run_usb(cli: &Cli, image: Option<&FlashImage>) -> Result<(), Box<dyn std::error::Error>> {
    let device = cli.device.to_string();
    let usb_config = itedlb_usb::parse_options(&[("device", device.as_str())])?;
    let pipe = itedlb_usb::UsbPipe::open_with_config(usb_config)?;
    run_on(pipe, cli, image)
}

#[cfg(not(feature = "usb"))]
fn run_usb(_cli: &Cli, _image: Option<&FlashImage>) -> Result<(), Box<dyn std::error::Error>> {
    Err("built without USB support".into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_missing_image_fails_before_backend() {
        let cli = Cli::try_parse_from(["itedlb", "-f", "/nonexistent/itedlb/ec.bin"]).unwrap();
        let err = run(&cli).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<itedlb_core::Error>(),
            Some(itedlb_core::Error::ImageIo(_))
        ));
    }

    #[cfg(feature = "dummy")]
    #[test]
    fn test_dummy_flash_and_probe() {
        let path = std::env::temp_dir().join(format!("itedlb-test-{}.bin", std::process::id()));
        std::fs::write(&path, vec![0x5Au8; 1000]).unwrap();

        let path_arg = path.to_string_lossy().into_owned();
        let cli = Cli::try_parse_from(["itedlb", "--dummy", "-f", path_arg.as_str()]).unwrap();
        let result = run(&cli);
        std::fs::remove_file(&path).unwrap();
        assert!(result.is_ok());

        let cli = Cli::try_parse_from(["itedlb", "--dummy", "--probe"]).unwrap();
        assert!(run(&cli).is_ok());
    }
}
