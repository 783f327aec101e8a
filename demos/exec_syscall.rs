use std::path::PathBuf;

use execpeek::{trace_exec, Arch, Command, Inspector, RegisterLayout, Tracer};
use structopt::StructOpt;
use tracing_subscriber::EnvFilter;

#[derive(StructOpt)]
struct Opt {
    /// Register layout to read with, defaults to the native one.
    #[structopt(long)]
    arch: Option<Arch>,

    /// Program to trace.
    #[structopt(parse(from_os_str))]
    program: PathBuf,

    /// Arguments to pass to the program.
    args: Vec<String>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let opt = Opt::from_args();

    let layout = match opt.arch {
        Some(arch) => RegisterLayout::for_arch(arch),
        None => RegisterLayout::native()?,
    };
    let inspector = Inspector::new(layout);

    let cmd = Command::new(&opt.program)?.args(&opt.args)?;

    let mut tracer = Tracer::new();
    let report = trace_exec(&mut tracer, &cmd, &inspector)?;

    println!("pid = {}, syscall = {}", report.pid, report.syscall_number);
    println!("exit = {:?}", report.exit);

    Ok(())
}
