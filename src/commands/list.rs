//! List command implementation

/// List attached DLB4 boards
#[cfg(feature = "usb")]
pub fn list_boards() -> Result<(), Box<dyn std::error::Error>> {
    let boards = itedlb_usb::UsbPipe::list_devices()?;
    if boards.is_empty() {
        println!("No ITE DLB4 board found");
        return Ok(());
    }

    println!("Attached boards:");
    println!();
    for (index, board) in boards.iter().enumerate() {
        println!("  {:>2}  {}", index, board);
    }
    Ok(())
}

/// List attached DLB4 boards
#[cfg(not(feature = "usb"))]
pub fn list_boards() -> Result<(), Box<dyn std::error::Error>> {
    Err("built without USB support".into())
}
