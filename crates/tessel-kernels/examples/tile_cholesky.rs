//! Single-tile Cholesky factorization and solve.
//!
//! Run with: cargo run -p tessel-kernels --example tile_cholesky [tile] [f32|f64] [device]

use tessel_core::{DType, Device, Result};
use tessel_kernels::get_device;
use tessel_kernels::linalg::CholeskyExample;

fn main() -> Result<()> {
    let mut args = std::env::args().skip(1);
    let mut example = CholeskyExample::default();
    if let Some(tile) = args.next() {
        example.tile = tile
            .parse()
            .map_err(|_| tessel_core::TesselError::InvalidArgument(format!("bad tile size '{tile}'")))?;
    }
    if let Some(dtype) = args.next() {
        example.dtype = dtype.parse::<DType>()?;
    }
    let device = match args.next() {
        Some(d) => d.parse::<Device>()?,
        None => Device::Accel(0),
    };

    let ctx = get_device(device)?;
    let report = example.run(&ctx)?;
    println!("{}", report.render());
    report.validate()?;
    println!("Example Tile Cholesky passed");
    Ok(())
}
