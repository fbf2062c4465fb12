//! Print the device report of the backend selected by the environment.

use std::process::ExitCode;

use htm_gpu::{BackendConfig, GpuBackend};
use log::error;

#[cfg(feature = "cuda")]
type SelectedDriver = htm_gpu::CudaDriver;
#[cfg(not(feature = "cuda"))]
type SelectedDriver = htm_gpu::HostDriver;

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let backend = BackendConfig::from_env().and_then(GpuBackend::<SelectedDriver>::new);
    match backend {
        Ok(backend) => {
            print!("{}", backend.device_info());
            println!("Kernel root: {}", backend.config().kernel_root.display());
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
