// VkSharpen — batch image sharpening with the NIS kernel on Vulkan compute.

use std::process::ExitCode;

use clap::Parser;

use vksharpen::{cli, logger};

fn main() -> ExitCode {
    logger::init();
    let args = cli::CliArgs::parse();
    cli::run(args)
}
