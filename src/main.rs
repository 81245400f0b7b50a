use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::anyhow;
use clap::Parser as ClapParser;
use clap::Subcommand;
use iamx::config::Config;
use iamx::crawler::{
    CrawlProgress, CrawledResource, FixtureClient, InMemoryStorage, ProgressSummary,
    RecordFilter, Storage, StoredWarning, crawl_into_storage,
};
use iamx::iamql::run_iamql;
use iamx::importer::import_inventory;
use iamx::model::{
    AccessTarget, AccessTuple, GrantExplanation, GrantStrategy, Member, ModelManager,
    ModelSummary, Resource,
};
use indexmap::IndexMap;
use serde::Serialize;

#[derive(clap::Parser)]
#[command(name = "iamx")]
#[command(about = "IAM policy graph crawler and access explainer", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Crawl a resource tree fixture and print the stored records.
    Crawl(CrawlCommand),
    /// Run IAMQL queries against an imported fixture.
    Query(QueryCommand),
    /// Explain which members can access a resource.
    ExplainResource(ExplainResourceCommand),
    /// Explain which resources members can access.
    ExplainMember(ExplainMemberCommand),
    /// Explain how a member was granted access to a resource.
    ExplainGranted(ExplainGrantedCommand),
    /// List the ways a denied access could be granted.
    ExplainDenied(ExplainDeniedCommand),
    /// List every resource and member holding a role or permission.
    AccessByPermission(AccessByPermissionCommand),
    /// List the resources a member can access, per role.
    AccessByMember(AccessByMemberCommand),
}

#[derive(clap::Args)]
struct InventoryArgs {
    /// Path to the JSON resource tree.
    #[arg(short, long)]
    fixture: PathBuf,
    /// Path to the TOML configuration.
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Pretty-print the output.
    #[arg(long)]
    pretty: bool,
}

#[derive(clap::Args)]
struct CrawlCommand {
    #[command(flatten)]
    inventory: InventoryArgs,
}

#[derive(clap::Args)]
struct QueryCommand {
    #[command(flatten)]
    inventory: InventoryArgs,
    /// Path to the IAMQL file, or `-` for stdin.
    #[arg(short, long, value_name = "IAMQL_FILE")]
    query: PathBuf,
}

#[derive(clap::Args)]
struct ExplainResourceCommand {
    #[command(flatten)]
    inventory: InventoryArgs,
    /// Name of the resource, e.g. `project/p1`.
    #[arg(short, long)]
    resource: String,
    /// Permissions the members must hold.
    #[arg(short = 'P', long = "permission")]
    permissions: Vec<String>,
    /// Replace groups by their transitive members.
    #[arg(long)]
    expand_groups: bool,
}

#[derive(clap::Args)]
struct ExplainMemberCommand {
    #[command(flatten)]
    inventory: InventoryArgs,
    /// Member names, e.g. `user/felix@example.com`.
    #[arg(short, long = "member", required = true)]
    members: Vec<String>,
}

#[derive(clap::Args)]
#[group(required = true, multiple = false)]
struct TargetArgs {
    /// Role to look for, e.g. `roles/viewer`.
    #[arg(long)]
    role: Option<String>,
    /// Permission to look for, e.g. `storage.buckets.get`.
    #[arg(long)]
    permission: Option<String>,
}

impl TargetArgs {
    fn target(&self) -> anyhow::Result<AccessTarget<'_>> {
        match (&self.role, &self.permission) {
            (Some(role), _) => Ok(AccessTarget::Role(role)),
            (None, Some(permission)) => Ok(AccessTarget::Permission(permission)),
            (None, None) => Err(anyhow!("Either a role or a permission is required")),
        }
    }
}

#[derive(clap::Args)]
struct ExplainGrantedCommand {
    #[command(flatten)]
    inventory: InventoryArgs,
    #[arg(short, long)]
    member: String,
    #[arg(short, long)]
    resource: String,
    #[command(flatten)]
    target: TargetArgs,
}

#[derive(clap::Args)]
struct ExplainDeniedCommand {
    #[command(flatten)]
    inventory: InventoryArgs,
    #[arg(short, long)]
    member: String,
    /// Resources the member should gain access to.
    #[arg(short, long = "resource", required = true)]
    resources: Vec<String>,
    /// Permissions to grant; ignored when roles are given.
    #[arg(short = 'P', long = "permission")]
    permissions: Vec<String>,
    #[arg(long = "role")]
    roles: Vec<String>,
}

#[derive(clap::Args)]
struct AccessByPermissionCommand {
    #[command(flatten)]
    inventory: InventoryArgs,
    #[command(flatten)]
    target: TargetArgs,
    /// Add the transitive members of bound groups.
    #[arg(long)]
    expand_groups: bool,
    /// Repeat each binding on the descendants of its resource.
    #[arg(long)]
    expand_resources: bool,
}

#[derive(clap::Args)]
struct AccessByMemberCommand {
    #[command(flatten)]
    inventory: InventoryArgs,
    #[arg(short, long)]
    member: String,
    /// Permissions the roles must hold.
    #[arg(short = 'P', long = "permission")]
    permissions: Vec<String>,
    /// Include the descendants of each bound resource.
    #[arg(long)]
    expand_resources: bool,
}

#[derive(Serialize)]
struct CrawlOutput {
    summary: ProgressSummary,
    records: Vec<CrawledResource>,
    warnings: Vec<StoredWarning>,
}

#[derive(Serialize)]
struct QueryOutput {
    columns: Vec<String>,
    rows: Vec<Vec<String>>,
}

#[derive(Serialize)]
struct ExplainResourceOutput<'a> {
    model: ModelSummary,
    path: Vec<&'a str>,
    members: Vec<&'a Member>,
}

#[derive(Serialize)]
struct ExplainMemberOutput<'a> {
    model: ModelSummary,
    memberships: IndexMap<&'a str, Vec<&'a str>>,
    resources: Vec<&'a Resource>,
}

#[derive(Serialize)]
struct ModelOutput<T> {
    model: ModelSummary,
    #[serde(flatten)]
    result: T,
}

#[derive(Serialize)]
struct StrategiesOutput<'a> {
    strategies: Vec<GrantStrategy<'a>>,
}

#[derive(Serialize)]
struct AccessOutput<'a> {
    access: Vec<AccessTuple<'a>>,
}

#[derive(Serialize)]
struct MemberAccessOutput<'a> {
    access: Vec<(&'a str, Vec<&'a str>)>,
}

fn as_strs(values: &[String]) -> Vec<&str> {
    values.iter().map(|value| value.as_str()).collect()
}

fn load_config(inventory: &InventoryArgs) -> anyhow::Result<Config> {
    match &inventory.config {
        Some(path) => Config::load(path),
        None => Ok(Config::default()),
    }
}

fn load_fixture(inventory: &InventoryArgs) -> anyhow::Result<FixtureClient> {
    let json = std::fs::read_to_string(&inventory.fixture).map_err(|_| {
        anyhow!(
            "Failed to read fixture file {}",
            inventory.fixture.display()
        )
    })?;
    FixtureClient::from_json(&json).map_err(|err| {
        anyhow!(
            "Failed to parse JSON fixture in file {} due to error: {}",
            inventory.fixture.display(),
            err
        )
    })
}

fn crawl(
    inventory: &InventoryArgs,
    config: &Config,
) -> anyhow::Result<(InMemoryStorage, ProgressSummary)> {
    let client = load_fixture(inventory)?;
    let storage = InMemoryStorage::new();
    let progress = CrawlProgress::new();
    let summary = crawl_into_storage(
        &client,
        &storage,
        &progress,
        &config.crawler,
        client.root().clone(),
    )?;
    Ok((storage, summary))
}

/// Crawls the fixture and imports it into a new model of `models`.
fn import(inventory: &InventoryArgs, models: &mut ModelManager) -> anyhow::Result<String> {
    let config = load_config(inventory)?;
    let (storage, _) = crawl(inventory, &config)?;
    let name = inventory.fixture.display().to_string();
    let handle = models.create(&name);
    import_inventory(&storage, models.get_mut(&handle)?, &config.importer)?;
    Ok(handle)
}

fn read_query(path: &Path) -> anyhow::Result<String> {
    if path.as_os_str() == "-" {
        let mut query = String::new();
        std::io::stdin().read_to_string(&mut query)?;
        return Ok(query);
    }
    std::fs::read_to_string(path)
        .map_err(|_| anyhow!("Failed to read IAMQL file {}", path.display()))
}

fn to_json<T: Serialize>(value: &T, pretty: bool) -> anyhow::Result<String> {
    Ok(if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    })
}

fn main() -> anyhow::Result<()> {
    let now = Instant::now();

    env_logger::init();
    let cli = Cli::parse();
    let mut models = ModelManager::new();

    let out_str = match &cli.command {
        Commands::Crawl(crawl_command) => {
            let inventory = &crawl_command.inventory;
            let config = load_config(inventory)?;
            let (storage, summary) = crawl(inventory, &config)?;
            let output = CrawlOutput {
                summary,
                records: storage.iterate(RecordFilter::default())?.collect(),
                warnings: storage.warnings()?,
            };
            to_json(&output, inventory.pretty)?
        }
        Commands::Query(query_command) => {
            let inventory = &query_command.inventory;
            let iamql = read_query(&query_command.query)?;
            let handle = import(inventory, &mut models)?;
            let data = models.get(&handle)?.data();
            let results: IndexMap<String, QueryOutput> = run_iamql(&iamql, data)?
                .into_iter()
                .map(|result| {
                    let rows = result.named_rows(data);
                    (
                        result.name,
                        QueryOutput {
                            columns: result.columns,
                            rows,
                        },
                    )
                })
                .collect();
            to_json(&results, inventory.pretty)?
        }
        Commands::ExplainResource(explain_command) => {
            let inventory = &explain_command.inventory;
            let handle = import(inventory, &mut models)?;
            let model = models.get(&handle)?;
            let data = model.data();
            if data.resource(&explain_command.resource).is_none() {
                return Err(anyhow!(
                    "Resource {} is not part of the inventory",
                    explain_command.resource
                ));
            }
            let permissions: Vec<&str> = explain_command
                .permissions
                .iter()
                .map(|p| p.as_str())
                .collect();
            let output = ExplainResourceOutput {
                model: model.summary(),
                path: data
                    .find_resource_path(&explain_command.resource)
                    .iter()
                    .map(|r| r.name.as_str())
                    .collect(),
                members: data.explain_has_access_to_resource(
                    &explain_command.resource,
                    &permissions,
                    explain_command.expand_groups,
                ),
            };
            to_json(&output, inventory.pretty)?
        }
        Commands::ExplainMember(explain_command) => {
            let inventory = &explain_command.inventory;
            let handle = import(inventory, &mut models)?;
            let model = models.get(&handle)?;
            let data = model.data();
            let members: Vec<&str> = explain_command.members.iter().map(|m| m.as_str()).collect();
            let output = ExplainMemberOutput {
                model: model.summary(),
                memberships: data.reverse_expand_members_graph(&members).edges,
                resources: data.explain_member_has_access_to(&members, false)?,
            };
            to_json(&output, inventory.pretty)?
        }
        Commands::ExplainGranted(explain_command) => {
            let inventory = &explain_command.inventory;
            let handle = import(inventory, &mut models)?;
            let model = models.get(&handle)?;
            let result: GrantExplanation<'_> = model.data().explain_granted(
                &explain_command.member,
                &explain_command.resource,
                explain_command.target.target()?,
            )?;
            let output = ModelOutput {
                model: model.summary(),
                result,
            };
            to_json(&output, inventory.pretty)?
        }
        Commands::ExplainDenied(explain_command) => {
            let inventory = &explain_command.inventory;
            let handle = import(inventory, &mut models)?;
            let model = models.get(&handle)?;
            let strategies = model.data().explain_denied(
                &explain_command.member,
                &as_strs(&explain_command.resources),
                &as_strs(&explain_command.permissions),
                &as_strs(&explain_command.roles),
            )?;
            let output = ModelOutput {
                model: model.summary(),
                result: StrategiesOutput { strategies },
            };
            to_json(&output, inventory.pretty)?
        }
        Commands::AccessByPermission(access_command) => {
            let inventory = &access_command.inventory;
            let handle = import(inventory, &mut models)?;
            let model = models.get(&handle)?;
            let access = model.data().query_access_by_permission(
                access_command.target.target()?,
                access_command.expand_groups,
                access_command.expand_resources,
            );
            let output = ModelOutput {
                model: model.summary(),
                result: AccessOutput { access },
            };
            to_json(&output, inventory.pretty)?
        }
        Commands::AccessByMember(access_command) => {
            let inventory = &access_command.inventory;
            let handle = import(inventory, &mut models)?;
            let model = models.get(&handle)?;
            let access = model.data().query_access_by_member(
                &access_command.member,
                &as_strs(&access_command.permissions),
                access_command.expand_resources,
            );
            let output = ModelOutput {
                model: model.summary(),
                result: MemberAccessOutput { access },
            };
            to_json(&output, inventory.pretty)?
        }
    };
    println!("{}", out_str);

    let elapsed = now.elapsed();
    log::info!("Elapsed: {:.2?}", elapsed);

    Ok(())
}
