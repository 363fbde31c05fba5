use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use vmigrate_core::types::DiskFormat;
use vmigrate_core::{MigrationOptions, MigrationPlan, VmigrateConfig};

use crate::error::{CliError, CliResult};
use crate::input::{collect_network_mapping, read_workload_file};
use crate::report::OutputFormat;
use crate::secrets::{Login, SOURCE_PASSWORD_ENV, TARGET_PASSWORD_ENV};

#[derive(Parser, Debug)]
#[command(name = "vmigrate")]
#[command(about = "Move virtual machines between management domains", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Migrate workloads from a source domain to a target domain
    Migrate(MigrateArgs),
    /// List registered domain providers
    Providers,
}

#[derive(Args, Debug)]
pub struct MigrateArgs {
    /// Source management domain address
    #[arg(long)]
    pub source: String,

    /// Target management domain address
    #[arg(long)]
    pub target: String,

    #[arg(long)]
    pub source_user: String,

    #[arg(long)]
    pub target_user: String,

    /// Workload to migrate (repeatable)
    #[arg(long = "vm", value_name = "NAME")]
    pub vms: Vec<String>,

    /// File with one workload name per line
    #[arg(long)]
    pub vm_file: Option<PathBuf>,

    /// Place every workload in this destination cluster
    #[arg(long)]
    pub dest_cluster: Option<String>,

    /// Place every workload on this destination datastore
    #[arg(long)]
    pub dest_datastore: Option<String>,

    /// Network mapping entry (repeatable)
    #[arg(long = "network-map", value_name = "SRC=DST")]
    pub network_map: Vec<String>,

    /// YAML or JSON file mapping source to destination networks
    #[arg(long)]
    pub network_map_file: Option<PathBuf>,

    /// Suffix appended to each migrated workload's name
    #[arg(long, allow_hyphen_values = true)]
    pub suffix: Option<String>,

    #[arg(long)]
    pub preserve_mac: bool,

    /// Disk provisioning format (thin, thick, eager-zeroed-thick)
    #[arg(long, default_value = "thin")]
    pub disk_format: DiskFormat,

    /// Maximum simultaneous migrations (1-8)
    #[arg(long, value_parser = clap::value_parser!(u8).range(1..=8))]
    pub concurrency: Option<u8>,

    /// Migrate one workload at a time
    #[arg(long, conflicts_with = "concurrency")]
    pub sequential: bool,

    /// Count network remap failures as degraded successes
    #[arg(long)]
    pub ignore_network_errors: bool,

    #[arg(long)]
    pub disconnect_before_remap: bool,

    /// Fall back to a management or VM network when a mapped network is missing
    #[arg(long)]
    pub enhanced_network_handling: bool,

    /// Configuration file (TOML)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Inventory file for the in-memory provider
    #[arg(long)]
    pub inventory: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub output: OutputFormat,
}

impl MigrateArgs {
    /// Layer command line settings over the file and environment
    pub fn load_config(&self) -> CliResult<VmigrateConfig> {
        let mut config = match &self.config {
            Some(path) => VmigrateConfig::from_file(path)?,
            None => VmigrateConfig::from_env()?,
        };

        if self.sequential {
            config.scheduler.max_concurrency = 1;
        } else if let Some(concurrency) = self.concurrency {
            config.scheduler.max_concurrency = usize::from(concurrency);
        }
        if let Some(inventory) = &self.inventory {
            config.provider.inventory = Some(inventory.clone());
        }

        config.validate()?;
        Ok(config)
    }

    pub fn plan(&self) -> CliResult<MigrationPlan> {
        let mut workloads = self.vms.clone();
        if let Some(path) = &self.vm_file {
            workloads.extend(read_workload_file(path)?);
        }
        if workloads.iter().all(|name| name.trim().is_empty()) {
            return Err(CliError::NoWorkloads);
        }

        let mut plan = MigrationPlan::new(self.source.as_str(), self.target.as_str())
            .workloads(workloads)
            .options(MigrationOptions {
                name_suffix: self.suffix.clone(),
                preserve_mac: self.preserve_mac,
                disk_format: self.disk_format,
                ignore_network_errors: self.ignore_network_errors,
                disconnect_before_remap: self.disconnect_before_remap,
                enhanced_network_handling: self.enhanced_network_handling,
            });
        plan.network_mapping =
            collect_network_mapping(self.network_map_file.as_deref(), &self.network_map)?;
        if let Some(cluster) = &self.dest_cluster {
            plan = plan.destination_cluster(cluster.as_str());
        }
        if let Some(datastore) = &self.dest_datastore {
            plan = plan.destination_datastore(datastore.as_str());
        }

        plan.validate()?;
        Ok(plan)
    }

    pub fn source_login(&self) -> Login<'_> {
        Login {
            role: "source",
            address: &self.source,
            username: &self.source_user,
            env_var: SOURCE_PASSWORD_ENV,
        }
    }

    pub fn target_login(&self) -> Login<'_> {
        Login {
            role: "target",
            address: &self.target,
            username: &self.target_user,
            env_var: TARGET_PASSWORD_ENV,
        }
    }
}
