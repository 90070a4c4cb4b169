use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use vm_image_builder::backend::{Backend, ImgManifest, SystemClock, Vmadm, Zfs};
use vm_image_builder::preflight::check_host_tools;
use vm_image_builder::signal::{install_interrupt_handler, CancelToken};
use vm_image_builder::{BuildDate, BuildRequest, BuilderConfig, Pipeline, RequestParams};

/// Setting this to 1 turns on step-by-step tracing.
const TRACE_ENV: &str = "VM_IMAGE_BUILDER_TRACE";

/// Build a reusable VM disk image from an installer ISO.
///
/// Writes `<name>-<YYYYMMDD>.zfs.gz` and `<name>-<YYYYMMDD>.json` into the
/// working directory.
#[derive(Debug, Parser)]
#[command(name = "vm-image-builder", version)]
struct Cli {
    /// Installer ISO to boot the VM from
    #[arg(long, value_name = "PATH")]
    iso: PathBuf,
    /// Image name; also the VM alias
    #[arg(long)]
    name: String,
    #[arg(long)]
    description: String,
    #[arg(long)]
    homepage: String,
    /// Owner UUID stamped on the VM
    #[arg(long, value_name = "UUID")]
    owner: String,
    #[arg(long)]
    ip: String,
    #[arg(long)]
    netmask: String,
    #[arg(long)]
    gateway: String,
    #[arg(long, value_name = "ID")]
    vlan: u16,
    /// Network UUID for the VM's NIC
    #[arg(long, value_name = "UUID")]
    network: String,
    /// OS family recorded in the manifest
    #[arg(long, default_value = "linux")]
    os: String,

    /// Builder configuration (TOML)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Directory receiving the template, artifact and manifest
    #[arg(long, default_value = ".")]
    workdir: PathBuf,
    /// Give up waiting for the install after this many seconds (0 waits forever)
    #[arg(long, value_name = "SECS")]
    poll_timeout: Option<u64>,
    /// Treat a failed stale-VM lookup as "no stale VM"
    #[arg(long)]
    lenient_preflight: bool,
    /// Leave the VM in place when the build fails
    #[arg(long)]
    keep_vm_on_failure: bool,
    /// Do not check that the host tools are on PATH
    #[arg(long)]
    skip_tool_check: bool,
}

impl Cli {
    fn request_params(&self) -> RequestParams {
        RequestParams {
            iso: self.iso.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            homepage: self.homepage.clone(),
            owner: self.owner.clone(),
            ip: self.ip.clone(),
            netmask: self.netmask.clone(),
            gateway: self.gateway.clone(),
            vlan: self.vlan,
            network: self.network.clone(),
            os: self.os.clone(),
        }
    }

    fn builder_config(&self) -> Result<BuilderConfig> {
        let mut config = match &self.config {
            Some(path) => BuilderConfig::load(path)?,
            None => BuilderConfig::default(),
        };
        if let Some(secs) = self.poll_timeout {
            config.poll.timeout_secs = secs;
        }
        config.preflight.lenient_lookup |= self.lenient_preflight;
        config.output.keep_vm_on_failure |= self.keep_vm_on_failure;
        config.validate()?;
        Ok(config)
    }
}

fn init_tracing() {
    let filter = if std::env::var(TRACE_ENV).is_ok_and(|v| v == "1") {
        EnvFilter::new("vm_image_builder=trace")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing();

    // Input problems share clap's exit status; nothing has touched the host yet.
    let (request, config) = match prepare(&cli) {
        Ok(prepared) => prepared,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            return ExitCode::from(2);
        }
    };

    match build(&cli, &request, &config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn prepare(cli: &Cli) -> Result<(BuildRequest, BuilderConfig)> {
    let config = cli.builder_config()?;
    let request = cli
        .request_params()
        .validate()
        .context("invalid build request")?;
    if !cli.workdir.is_dir() {
        anyhow::bail!("working directory not found: {}", cli.workdir.display());
    }
    Ok((request, config))
}

fn build(cli: &Cli, request: &BuildRequest, config: &BuilderConfig) -> Result<()> {
    if !cli.skip_tool_check {
        check_host_tools(&config.tools)?;
    }

    let cancel = CancelToken::new();
    install_interrupt_handler(&cancel)?;

    let vmadm = Vmadm::new(&config.tools.vmadm);
    let zfs = Zfs::new(&config.tools.zfs);
    let manifest = ImgManifest::new(&config.tools.manifest);
    let backend = Backend {
        inventory: &vmadm,
        storage: &zfs,
        manifest: &manifest,
        clock: &SystemClock,
    };

    let build_date = BuildDate::today_utc();
    println!("[build:{}] date {}", request.name, build_date);

    let output = Pipeline::new(backend, config, &cli.workdir)
        .with_cancel(cancel)
        .run(request, build_date)?;

    println!();
    println!("Image built:");
    println!("  artifact: {}", output.artifact.display());
    println!("  manifest: {}", output.manifest.display());
    println!("  sha256:   {}", output.sha256);
    Ok(())
}
