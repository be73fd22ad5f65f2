use std::error::Error;

use vergen::EmitBuilder;

fn main() -> Result<(), Box<dyn Error>> {
    // build time and target triple for --version
    EmitBuilder::builder().all_build().all_cargo().emit()?;

    Ok(())
}
