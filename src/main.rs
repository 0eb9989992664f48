//! The command-line driver: assemble, link, and simulate.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

use clap::Parser;

use rv32_ensemble::asm::{assemble, ObjectUnit, SourceInfo};
use rv32_ensemble::cfg::Config;
use rv32_ensemble::err::{format_error, Error};
use rv32_ensemble::link::link;
use rv32_ensemble::parse::parse_ast;
use rv32_ensemble::sim::io::Sink;
use rv32_ensemble::sim::Simulator;

#[derive(Debug, Parser)]
#[clap(author, version, about = "A RISC-V RV32I assembler, linker, and interpreter")]
struct Args {
    /// Assembly source files, linked in the order given.
    #[clap(required = true)]
    files: Vec<PathBuf>,

    /// Trace execution and honor breakpoints.
    #[clap(long)]
    debug: bool,

    /// Print verbose per-component summaries.
    #[clap(long)]
    detail: bool,

    /// Maximum number of instructions to execute.
    #[clap(long)]
    timeout: Option<u64>,

    /// Guest memory size in bytes.
    #[clap(long)]
    memory_size: Option<u32>,
}

impl Args {
    fn into_config(self) -> Config {
        let mut config = Config {
            assembly_files: self.files,
            debug: self.debug,
            detail: self.detail,
            ..Default::default()
        };
        if let Some(timeout) = self.timeout {
            config.timeout = timeout;
        }
        if let Some(size) = self.memory_size {
            config.memory_size = size;
        }
        config
    }
}

/// A loaded source file, kept around for error reporting.
struct SourceFile {
    name: String,
    info: SourceInfo,
}

fn report(err: &dyn Error, file: &SourceFile) -> ExitCode {
    Sink::Stderr.write_bytes(format_error(err, &file.name, &file.info).as_bytes());
    ExitCode::FAILURE
}

fn main() -> ExitCode {
    let config = Args::parse().into_config();
    let start_time = Instant::now();

    // Assemble each file.
    let mut sources = vec![];
    let mut units: Vec<ObjectUnit> = vec![];
    for path in &config.assembly_files {
        let name = path.display().to_string();
        let src = match std::fs::read_to_string(path) {
            Ok(src) => src,
            Err(e) => {
                Sink::Stderr.write_bytes(format!("error: cannot read {name}: {e}\n").as_bytes());
                return ExitCode::FAILURE;
            },
        };
        let file = SourceFile { name, info: SourceInfo::new(&src) };

        let ast = match parse_ast(&src) {
            Ok(ast) => ast,
            Err(e) => return report(&e, &file),
        };
        match assemble(ast) {
            Ok(unit) => units.push(unit),
            Err(e) => return report(&e, &file),
        }
        sources.push(file);
    }

    // Link.
    let image = match link(&units, &config) {
        Ok(image) => image,
        Err(e) => {
            // Point at the offending file when the error names one.
            let file = e.file.and_then(|i| sources.get(i));
            return match file {
                Some(file) => report(&e, file),
                None => {
                    Sink::Stderr.write_bytes(format!("error: {e}\n").as_bytes());
                    ExitCode::FAILURE
                },
            };
        },
    };

    let mut sim = Simulator::new(&image, &config);

    if config.detail {
        sim.console.message.write_bytes(image.layout_report().as_bytes());
    }

    let build_time = Instant::now();
    let banner = format!(" Build time: {}ms ", (build_time - start_time).as_millis());
    sim.console.message.write_bytes(format!("\n{banner:=^80}\n\n").as_bytes());

    // Simulate.
    let result = sim.run();

    sim.print_details();
    let interpret = format!(" Interpret time: {}ms ", build_time.elapsed().as_millis());
    sim.console.message.write_bytes(format!("\n{interpret:=^80}\n\n").as_bytes());

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let report = e.report(&sim.regs);
            sim.console.panic.write_bytes(report.as_bytes());
            ExitCode::FAILURE
        },
    }
}
