//! Flash and probe commands

use std::path::Path;

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use itedlb_core::sequencer::{FlashProgress, Pass};
use itedlb_core::{BulkPipe, FlashConfig, FlashImage, Session};

/// Create a progress bar for one pass
fn create_pass_bar(total: u64, pass: Pass) -> Result<ProgressBar, Box<dyn std::error::Error>> {
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(&format!(
                "{{spinner:.green}} [{{elapsed_precise}}] [{{bar:40.cyan/blue}}] {{pos}}/{{len}} blocks ({{percent}}%) {}",
                pass
            ))?
            .progress_chars("#>-"),
    );
    Ok(pb)
}

/// Progress reporter using indicatif progress bars
pub struct IndicatifProgress {
    multi: MultiProgress,
    current_bar: Option<ProgressBar>,
}

impl IndicatifProgress {
    pub fn new() -> Self {
        Self {
            multi: MultiProgress::new(),
            current_bar: None,
        }
    }
}

impl Default for IndicatifProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl FlashProgress for IndicatifProgress {
    fn pass_started(&mut self, pass: Pass, blocks: usize) {
        let total = blocks as u64;
        let pb = self
            .multi
            .add(create_pass_bar(total, pass).unwrap_or_else(|_| ProgressBar::new(total)));
        self.current_bar = Some(pb);
    }

    fn block_done(&mut self, _pass: Pass, blocks_done: usize, _percent: usize) {
        if let Some(pb) = &self.current_bar {
            pb.set_position(blocks_done as u64);
        }
    }

    fn pass_complete(&mut self, pass: Pass) {
        if let Some(pb) = self.current_bar.take() {
            pb.finish_with_message(format!("{} complete", pass));
        }
    }
}

/// Bring the board up and print what was found
pub fn run_probe<P: BulkPipe>(pipe: P, config: &FlashConfig) -> Result<(), Box<dyn std::error::Error>> {
    let session = Session::bring_up(pipe, config)?;
    println!("{}", session.info());
    session.close();
    Ok(())
}

/// Load the image to flash
pub fn load_image(path: &Path) -> Result<FlashImage, Box<dyn std::error::Error>> {
    let image = FlashImage::from_file(path)?;
    println!(
        "Image {}: {} bytes, {} blocks",
        path.display(),
        image.file_len(),
        image.block_count()
    );
    Ok(image)
}

/// Flash `image` onto the board behind `pipe`
pub fn run_flash<P: BulkPipe>(
    pipe: P,
    config: &FlashConfig,
    image: &FlashImage,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut session = Session::bring_up(pipe, config)?;
    println!("{}", session.info());

    let mut progress = IndicatifProgress::new();
    session.flash(image, &mut progress)?;

    println!("Flash complete");
    session.close();
    Ok(())
}
