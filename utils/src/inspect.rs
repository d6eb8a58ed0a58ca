use std::{fs, path::PathBuf};

use anyhow::Context;
use gpu_binder::{DriverBindings, DynamicSharedMem, Module, driver::host::spirv};
use structopt::StructOpt;

#[derive(StructOpt)]
pub struct InspectOptions {
    #[structopt(required = true, short, long)]
    input: PathBuf,
    /// Kernels to query, defaults to every SPIR-V kernel entry point
    #[structopt(short, long)]
    kernel: Vec<String>,
}

impl InspectOptions {
    pub fn run(&self) -> anyhow::Result<()> {
        let image = fs::read(&self.input).with_context(|| format!("Failed to read {}!", self.input.display()))?;

        let mut kernels = self.kernel.clone();
        if kernels.is_empty() {
            let entries = spirv::entry_points(&image)
                .map_err(|status| anyhow::anyhow!("{status}"))
                .context("No --kernel given and the input is not a SPIR-V module!")?;
            kernels = entries.into_keys().collect();
            kernels.sort();
        }

        let driver = crate::open_driver()?;
        let name = <gpu_binder::ActiveDriver as DriverBindings>::NAME;
        let module = Module::load(driver, &image).with_context(|| format!("The {name} driver rejected the module!"))?;

        println!("Module     : {} ({} bytes)", module.handle(), image.len());
        println!("Driver     : {name}");

        for name in &kernels {
            let kernel = module.kernel(name).with_context(|| format!("Failed to resolve kernel '{name}'!"))?;
            let block = kernel.suggest_max_block_size(DynamicSharedMem::None)?;

            println!("Kernel     : {name}");
            println!("  Handle   : {}", kernel.handle());
            println!("  Params   : {}", kernel.parameter_count());
            println!("  Block    : {block}");
        }

        Ok(())
    }
}
