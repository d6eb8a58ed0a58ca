use std::time::Instant;

use anyhow::{Context, bail};
use gpu_binder::BufferAdapter;
use structopt::StructOpt;

#[derive(StructOpt)]
pub struct SelftestOptions {
    #[structopt(short, long, default_value = "1024")]
    count: usize,
    #[structopt(short, long, default_value = "7", allow_hyphen_values = true)]
    value: i32,
}

impl SelftestOptions {
    pub fn run(&self) -> anyhow::Result<()> {
        let timer = Instant::now();
        let adapter = BufferAdapter::new(crate::open_driver()?);

        let filled = adapter.allocate::<i32>(self.count).context("Failed to allocate device memory!")?;
        filled.fill(self.value)?;

        if filled.read()?.iter().any(|&x| x != self.value) {
            bail!("memset: read back values differ from {}", self.value);
        }
        println!("memset     : ok");

        let source: Vec<i32> = (0..self.count as i32).collect();
        let copied = adapter.allocate::<i32>(self.count)?;
        copied.write(&source)?;

        if copied.read()? != source {
            bail!("copy: read back values differ from the source");
        }
        println!("copy       : ok");

        let equal = unsafe { adapter.is_equal::<i32>(copied.ptr(), copied.ptr(), self.count)? };
        let differs = !unsafe { adapter.is_equal::<i32>(copied.ptr(), filled.ptr(), self.count)? };

        if !equal || (differs != source.iter().any(|&x| x != self.value)) {
            bail!("is_equal: comparison results are inconsistent");
        }
        println!("is_equal   : ok");

        println!("Passed in {:.3} seconds", timer.elapsed().as_secs_f32());

        Ok(())
    }
}
