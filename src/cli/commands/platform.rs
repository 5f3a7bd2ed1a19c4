//! Platform command.

use crate::FILE_EVENTS_VERSION;
use crate::platform::Platform;

/// Print the resolved platform, the engine artifact and the protocol version.
pub fn run_platform() -> anyhow::Result<()> {
    let platform = Platform::current();
    println!("Platform:         {platform}");
    println!("Protocol version: {FILE_EVENTS_VERSION}");
    match platform.artifact() {
        Ok(artifact) => println!("Engine artifact:  {artifact}"),
        Err(e) => println!("Engine artifact:  unavailable ({e})"),
    }
    Ok(())
}
