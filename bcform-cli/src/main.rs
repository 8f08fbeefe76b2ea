use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::Write;
use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use colored::Colorize;

use bcform_core::differ::{create_destroy_plan, create_plan};
use bcform_core::effect::Effect;
use bcform_core::interpreter::{EffectOutcome, Interpreter, InterpreterConfig};
use bcform_core::parser::{self, ParsedFile};
use bcform_core::plan::Plan;
use bcform_core::provider::Provider;
use bcform_core::resolver::{
    Bindings, bind_state, resolve_resource, seed_bindings, sort_resources_by_dependencies,
};
use bcform_core::resource::{Resource, ResourceId, State, Value};
use bcform_core::schema::ResourceSchema;
use bcform_provider_baiducloud::resources::all_types;
use bcform_provider_baiducloud::sweeper;
use bcform_provider_baiducloud::{BaiduClient, BaiduCloudProvider, Config, PROVIDER_NAME};
use bcform_state::state::{ResourceState, StateFile, json_to_value};
use bcform_state::{BackendConfig, LocalBackend, LockOperation, StateBackend, create_backend};

const DEFAULT_FILE: &str = "main.bcf";

/// Exit status of `plan --detailed-exitcode` when changes are pending
const EXIT_CHANGES: i32 = 2;

#[derive(Parser)]
#[command(name = "bcform")]
#[command(about = "Declarative infrastructure for Baidu Cloud", long_about = None)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate the configuration file
    Validate {
        /// Path to .bcf file
        #[arg(default_value = DEFAULT_FILE)]
        file: PathBuf,
    },
    /// Show execution plan without applying changes
    Plan {
        /// Path to .bcf file
        #[arg(default_value = DEFAULT_FILE)]
        file: PathBuf,

        /// Exit with status 2 when the plan contains changes
        #[arg(long)]
        detailed_exitcode: bool,
    },
    /// Apply changes to reach the desired state
    Apply {
        /// Path to .bcf file
        #[arg(default_value = DEFAULT_FILE)]
        file: PathBuf,

        /// Skip interactive approval
        #[arg(long)]
        auto_approve: bool,

        /// Keep applying the remaining effects after a failure
        #[arg(long)]
        continue_on_error: bool,
    },
    /// Destroy all resources defined in the configuration file
    Destroy {
        /// Path to .bcf file
        #[arg(default_value = DEFAULT_FILE)]
        file: PathBuf,

        /// Skip interactive approval
        #[arg(long)]
        auto_approve: bool,
    },
    /// Adopt an existing remote object into state
    Import {
        /// Path to .bcf file
        file: PathBuf,

        /// Binding of the resource in the configuration
        binding: String,

        /// Vendor identifier of the existing object (e.g., lb-xxxx)
        identifier: String,
    },
    /// Inspect or modify the state
    State {
        #[command(subcommand)]
        command: StateCommands,
    },
    /// Delete leftover objects whose name starts with a prefix
    Sweep {
        /// Name prefix of the objects to delete
        #[arg(long)]
        prefix: String,

        /// Region to sweep (defaults to BAIDUCLOUD_REGION)
        #[arg(long)]
        region: Option<String>,
    },
    /// List resource types or show the schema of one
    Schema {
        /// Resource type (e.g., blb_listener)
        resource_type: Option<String>,
    },
    /// Generate shell completions
    Completions {
        shell: Shell,
    },
}

#[derive(Subcommand)]
enum StateCommands {
    /// List managed resources
    List {
        #[arg(long, short, default_value = DEFAULT_FILE)]
        file: PathBuf,
    },
    /// Show the stored attributes of a resource
    Show {
        binding: String,

        #[arg(long, short, default_value = DEFAULT_FILE)]
        file: PathBuf,
    },
    /// Forget a resource without deleting it remotely
    Rm {
        binding: String,

        #[arg(long, short, default_value = DEFAULT_FILE)]
        file: PathBuf,
    },
    /// Release a stale state lock
    ForceUnlock {
        lock_id: String,

        #[arg(long, short, default_value = DEFAULT_FILE)]
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match cli.command {
        Commands::Validate { file } => run_validate(&file).map(|()| 0),
        Commands::Plan {
            file,
            detailed_exitcode,
        } => run_plan(&file).await.map(|has_changes| {
            if has_changes && detailed_exitcode {
                EXIT_CHANGES
            } else {
                0
            }
        }),
        Commands::Apply {
            file,
            auto_approve,
            continue_on_error,
        } => run_apply(&file, auto_approve, continue_on_error)
            .await
            .map(|()| 0),
        Commands::Destroy { file, auto_approve } => {
            run_destroy(&file, auto_approve).await.map(|()| 0)
        }
        Commands::Import {
            file,
            binding,
            identifier,
        } => run_import(&file, &binding, &identifier).await.map(|()| 0),
        Commands::State { command } => run_state(command).await.map(|()| 0),
        Commands::Sweep { prefix, region } => run_sweep(&prefix, region.as_deref())
            .await
            .map(|()| 0),
        Commands::Schema { resource_type } => run_schema(resource_type.as_deref()).map(|()| 0),
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "bcform", &mut std::io::stdout());
            Ok(0)
        }
    };

    match result {
        Ok(0) => {}
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("{} {}", "Error:".red().bold(), e);
            std::process::exit(1);
        }
    }
}

fn log_level(verbose: u8) -> &'static str {
    match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

/// RUST_LOG takes precedence over -v
fn init_logging(verbose: u8) {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level(verbose)))
        .format_timestamp(None)
        .init();
}

fn get_schemas() -> HashMap<String, ResourceSchema> {
    all_types()
        .into_iter()
        .map(|t| (t.name().to_string(), t.schema()))
        .collect()
}

fn load_config(file: &PathBuf) -> Result<ParsedFile, String> {
    let content = fs::read_to_string(file)
        .map_err(|e| format!("Failed to read {}: {}", file.display(), e))?;
    parser::parse_and_resolve(&content).map_err(|e| format!("Parse error: {}", e))
}

/// Check every provider block and resource against the known schemas
fn validate_parsed(
    parsed: &ParsedFile,
    schemas: &HashMap<String, ResourceSchema>,
) -> Result<(), String> {
    let mut errors = Vec::new();

    for provider in &parsed.providers {
        if provider.name != PROVIDER_NAME {
            errors.push(format!("Unsupported provider '{}'", provider.name));
        }
    }
    if let Err(e) = validate_resources(&parsed.resources, schemas) {
        errors.push(e);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors.join("\n"))
    }
}

fn validate_resources(
    resources: &[Resource],
    schemas: &HashMap<String, ResourceSchema>,
) -> Result<(), String> {
    let mut all_errors = Vec::new();

    for resource in resources {
        let provider = resource.provider().unwrap_or_default();
        if provider != PROVIDER_NAME {
            all_errors.push(format!("{}: unknown provider '{}'", resource.id, provider));
            continue;
        }
        let Some(schema) = schemas.get(&resource.id.resource_type) else {
            all_errors.push(format!(
                "{}: unknown resource type '{}'",
                resource.id, resource.id.resource_type
            ));
            continue;
        };
        if schema.data_source && !resource.is_data_source() {
            all_errors.push(format!(
                "{}: {} is a data source, declare it with 'read'",
                resource.id, resource.id.resource_type
            ));
            continue;
        }
        if !schema.data_source && resource.is_data_source() {
            all_errors.push(format!(
                "{}: {} is a managed resource and cannot be used with 'read'",
                resource.id, resource.id.resource_type
            ));
            continue;
        }
        if let Err(errors) = schema.validate(&resource.attributes) {
            for error in errors {
                all_errors.push(format!("{}: {}", resource.id, error));
            }
        }
    }

    if all_errors.is_empty() {
        Ok(())
    } else {
        Err(all_errors.join("\n"))
    }
}

fn get_provider(parsed: &ParsedFile) -> Result<BaiduCloudProvider, String> {
    let attributes = parsed
        .provider(PROVIDER_NAME)
        .map(|p| p.attributes.clone())
        .unwrap_or_default();
    let config = Config::from_attributes(&attributes)
        .map_err(|e| format!("Provider configuration error: {}", e))?;
    config
        .validate()
        .map_err(|e| format!("Provider configuration error: {}", e))?;
    BaiduCloudProvider::new(config).map_err(|e| e.to_string())
}

async fn open_backend(parsed: &ParsedFile) -> Result<Box<dyn StateBackend>, String> {
    let config = parsed
        .backend
        .as_ref()
        .map(BackendConfig::from)
        .unwrap_or_else(|| BackendConfig::local(LocalBackend::DEFAULT_STATE_FILE));
    create_backend(&config)
        .await
        .map_err(|e| format!("State backend error: {}", e))
}

async fn read_state_file(backend: &dyn StateBackend) -> Result<StateFile, String> {
    Ok(backend
        .read_state()
        .await
        .map_err(|e| format!("Failed to read state: {}", e))?
        .unwrap_or_default())
}

async fn persist(backend: &dyn StateBackend, state_file: &mut StateFile) -> Result<(), String> {
    state_file.increment_serial();
    backend
        .write_state(state_file)
        .await
        .map_err(|e| format!("Failed to write state: {}", e))
}

/// Fill in secrets and write-only attributes the read cannot report from what
/// was stored after the last apply
///
/// Other attributes missing from the read stay missing so the plan shows the drift.
fn overlay_stored(
    mut state: State,
    stored: Option<&ResourceState>,
    schema: Option<&ResourceSchema>,
) -> State {
    let (Some(stored), Some(schema)) = (stored, schema) else {
        return state;
    };
    if !state.exists {
        return state;
    }
    for (key, value) in stored.to_state().attributes {
        if schema.is_unreadable(&key) {
            state.attributes.entry(key).or_insert(value);
        }
    }
    state
}

/// Read the remote state of every declared resource in dependency order
///
/// Data sources whose inputs are already known are queried so that plans can
/// show their outputs. State entries no longer declared are kept as stored so
/// the plan deletes them.
async fn refresh_states(
    provider: &BaiduCloudProvider,
    resources: &[Resource],
    state_file: &StateFile,
) -> Result<HashMap<ResourceId, State>, String> {
    let sorted = sort_resources_by_dependencies(resources).map_err(|e| e.to_string())?;
    let schemas = get_schemas();
    let mut bindings = Bindings::new();
    let mut states = HashMap::new();

    for resource in &sorted {
        let resolved = resolve_resource(resource, &bindings);

        if resource.is_data_source() {
            if resolved.attributes.values().any(Value::contains_ref) {
                bind_state(&mut bindings, &resolved, &State::not_found(resource.id.clone()));
                continue;
            }
            let state = provider
                .read_data_source(&resolved)
                .await
                .map_err(|e| e.to_string())?;
            bind_state(&mut bindings, &resolved, &state);
            states.insert(resource.id.clone(), state);
            continue;
        }

        let stored = state_file.find_resource(&resource.id.resource_type, &resource.id.name);
        let identifier = stored.and_then(|s| s.identifier.as_deref());
        let state = provider
            .read(&resource.id, identifier)
            .await
            .map_err(|e| e.to_string())?;
        if identifier.is_some() && !state.exists {
            log::warn!("{} no longer exists remotely", resource.id);
        }
        let state = overlay_stored(state, stored, schemas.get(&resource.id.resource_type));
        bind_state(&mut bindings, &resolved, &state);
        states.insert(resource.id.clone(), state);
    }

    let declared: HashSet<&ResourceId> = resources.iter().map(|r| &r.id).collect();
    for stored in &state_file.resources {
        let id = stored.resource_id();
        if !declared.contains(&id) {
            states.insert(id, stored.to_state());
        }
    }

    Ok(states)
}

/// Apply schema defaults so plans and handlers see the effective values
fn with_defaults(resources: &[Resource], schemas: &HashMap<String, ResourceSchema>) -> Vec<Resource> {
    resources
        .iter()
        .cloned()
        .map(|mut resource| {
            if let Some(schema) = schemas.get(&resource.id.resource_type) {
                schema.apply_defaults(&mut resource.attributes);
            }
            resource
        })
        .collect()
}

/// Drop deletions of resources marked protected in state
fn without_protected(plan: Plan, state_file: &StateFile) -> Plan {
    let mut filtered = Plan::new();
    for effect in plan.effects() {
        if let Effect::Delete { id, .. } = effect
            && state_file
                .find_resource(&id.resource_type, &id.name)
                .is_some_and(|r| r.protected)
        {
            println!(
                "  {} {} is protected and will not be deleted",
                "!".yellow().bold(),
                id
            );
            continue;
        }
        filtered.add(effect.clone());
    }
    filtered
}

fn confirm(question: &str, details: &str) -> Result<bool, String> {
    println!("{}", question.yellow().bold());
    println!("  {}", details.yellow());
    print!("\n  Enter a value: ");
    std::io::stdout().flush().map_err(|e| e.to_string())?;

    let mut input = String::new();
    std::io::stdin()
        .read_line(&mut input)
        .map_err(|e| e.to_string())?;
    println!();
    Ok(input.trim() == "yes")
}

fn run_validate(file: &PathBuf) -> Result<(), String> {
    let parsed = load_config(file)?;
    let schemas = get_schemas();

    println!("{}", "Validating...".cyan());
    validate_parsed(&parsed, &schemas)?;
    sort_resources_by_dependencies(&parsed.resources).map_err(|e| e.to_string())?;

    println!(
        "{}",
        format!(
            "✓ {} resources validated successfully.",
            parsed.resources.len()
        )
        .green()
        .bold()
    );
    Ok(())
}

/// Returns whether the plan contains changes
async fn run_plan(file: &PathBuf) -> Result<bool, String> {
    let parsed = load_config(file)?;
    let schemas = get_schemas();
    validate_parsed(&parsed, &schemas)?;

    let provider = get_provider(&parsed)?;
    let backend = open_backend(&parsed).await?;
    let state_file = read_state_file(backend.as_ref()).await?;

    println!("{}", "Reading current state...".cyan());
    let resources = with_defaults(&parsed.resources, &schemas);
    let current = refresh_states(&provider, &resources, &state_file).await?;
    let plan = create_plan(&resources, &current, &schemas).map_err(|e| e.to_string())?;
    let plan = without_protected(plan, &state_file);
    println!();

    print_plan(&plan, &schemas);
    Ok(plan.mutation_count() > 0)
}

async fn run_apply(file: &PathBuf, auto_approve: bool, continue_on_error: bool) -> Result<(), String> {
    let parsed = load_config(file)?;
    let schemas = get_schemas();
    validate_parsed(&parsed, &schemas)?;

    let provider = get_provider(&parsed)?;
    let backend = open_backend(&parsed).await?;
    let lock = backend
        .acquire_lock(LockOperation::Apply)
        .await
        .map_err(|e| e.to_string())?;

    let result = apply_locked(
        &parsed,
        &schemas,
        provider,
        backend.as_ref(),
        auto_approve,
        continue_on_error,
    )
    .await;

    let released = backend
        .release_lock(&lock)
        .await
        .map_err(|e| format!("Failed to release state lock: {}", e));
    result.and(released)
}

async fn apply_locked(
    parsed: &ParsedFile,
    schemas: &HashMap<String, ResourceSchema>,
    provider: BaiduCloudProvider,
    backend: &dyn StateBackend,
    auto_approve: bool,
    continue_on_error: bool,
) -> Result<(), String> {
    let mut state_file = read_state_file(backend).await?;

    println!("{}", "Reading current state...".cyan());
    let resources = with_defaults(&parsed.resources, schemas);
    let current = refresh_states(&provider, &resources, &state_file).await?;
    let plan = create_plan(&resources, &current, schemas).map_err(|e| e.to_string())?;
    let plan = without_protected(plan, &state_file);
    println!();

    if plan.mutation_count() == 0 {
        println!("{}", "No changes needed.".green());
        return Ok(());
    }

    print_plan(&plan, schemas);
    println!();

    if !auto_approve
        && !confirm(
            "Do you want to perform these actions?",
            "Only 'yes' will be accepted to approve.",
        )?
    {
        println!("{}", "Apply cancelled.".yellow());
        return Ok(());
    }

    println!("{}", "Applying changes...".cyan().bold());
    println!();

    let interpreter = Interpreter::new(provider).with_config(InterpreterConfig {
        dry_run: false,
        continue_on_error,
    });
    let mut bindings = seed_bindings(&resources, &current);
    let mut success_count = 0;
    let mut failure_count = 0;

    for effect in plan.effects() {
        match interpreter.execute_effect(effect, &mut bindings).await {
            Ok(outcome) => {
                if effect.is_mutating() {
                    record_outcome(&mut state_file, &outcome);
                    persist(backend, &mut state_file).await?;
                    println!("  {} {}", "✓".green(), format_effect(effect));
                    success_count += 1;
                }
            }
            Err(e) => {
                println!("  {} {} - {}", "✗".red(), format_effect(effect), e);
                failure_count += 1;
                if !continue_on_error {
                    break;
                }
            }
        }
    }

    println!();
    if failure_count == 0 {
        println!(
            "{}",
            format!("Apply complete! {} changes applied.", success_count)
                .green()
                .bold()
        );
        Ok(())
    } else {
        Err(format!(
            "Apply failed. {} succeeded, {} failed.",
            success_count, failure_count
        ))
    }
}

fn record_outcome(state_file: &mut StateFile, outcome: &EffectOutcome) {
    match outcome {
        EffectOutcome::Created { state }
        | EffectOutcome::Updated { state }
        | EffectOutcome::Replaced { state } => {
            state_file.upsert_resource(ResourceState::from_state(state, PROVIDER_NAME));
        }
        EffectOutcome::Deleted { id } => {
            state_file.remove_resource(&id.resource_type, &id.name);
        }
        EffectOutcome::Read { .. } | EffectOutcome::Skipped { .. } => {}
    }
}

async fn run_destroy(file: &PathBuf, auto_approve: bool) -> Result<(), String> {
    let parsed = load_config(file)?;
    let schemas = get_schemas();
    validate_parsed(&parsed, &schemas)?;

    let provider = get_provider(&parsed)?;
    let backend = open_backend(&parsed).await?;
    let lock = backend
        .acquire_lock(LockOperation::Destroy)
        .await
        .map_err(|e| e.to_string())?;

    let result = destroy_locked(&parsed, provider, backend.as_ref(), auto_approve).await;

    let released = backend
        .release_lock(&lock)
        .await
        .map_err(|e| format!("Failed to release state lock: {}", e));
    result.and(released)
}

async fn destroy_locked(
    parsed: &ParsedFile,
    provider: BaiduCloudProvider,
    backend: &dyn StateBackend,
    auto_approve: bool,
) -> Result<(), String> {
    let mut state_file = read_state_file(backend).await?;
    let current = state_file.current_states();
    let plan = create_destroy_plan(&parsed.resources, &current).map_err(|e| e.to_string())?;
    let plan = without_protected(plan, &state_file);

    if plan.is_empty() {
        println!("{}", "No resources to destroy.".green());
        return Ok(());
    }

    println!("{}", "Destroy Plan:".red().bold());
    println!();
    for effect in plan.effects() {
        println!("  {} {}", "-".red().bold(), effect.resource_id());
    }
    println!();
    println!("Plan: {} to destroy.", plan.effects().len().to_string().red());
    println!();

    if !auto_approve
        && !confirm(
            "Do you really want to destroy all resources?",
            "This action cannot be undone. Type 'yes' to confirm.",
        )?
    {
        println!("{}", "Destroy cancelled.".yellow());
        return Ok(());
    }

    println!("{}", "Destroying resources...".red().bold());
    println!();

    let interpreter = Interpreter::new(provider).with_config(InterpreterConfig {
        dry_run: false,
        continue_on_error: true,
    });
    let mut bindings = Bindings::new();
    let mut success_count = 0;
    let mut failure_count = 0;

    for effect in plan.effects() {
        match interpreter.execute_effect(effect, &mut bindings).await {
            Ok(outcome) => {
                record_outcome(&mut state_file, &outcome);
                persist(backend, &mut state_file).await?;
                println!("  {} {}", "✓".green(), format_effect(effect));
                success_count += 1;
            }
            Err(e) => {
                println!("  {} {} - {}", "✗".red(), format_effect(effect), e);
                failure_count += 1;
            }
        }
    }

    println!();
    if failure_count == 0 {
        println!(
            "{}",
            format!("Destroy complete! {} resources destroyed.", success_count)
                .green()
                .bold()
        );
        Ok(())
    } else {
        Err(format!(
            "Destroy failed. {} succeeded, {} failed.",
            success_count, failure_count
        ))
    }
}

async fn run_import(file: &PathBuf, binding: &str, identifier: &str) -> Result<(), String> {
    let parsed = load_config(file)?;
    let resource = parsed
        .find_binding(binding)
        .ok_or_else(|| format!("No resource bound to '{}' in {}", binding, file.display()))?;
    if resource.is_data_source() {
        return Err(format!("'{}' is a data source and cannot be imported", binding));
    }
    let id = resource.id.clone();

    let provider = get_provider(&parsed)?;
    let backend = open_backend(&parsed).await?;
    let lock = backend
        .acquire_lock(LockOperation::Import)
        .await
        .map_err(|e| e.to_string())?;

    let result: Result<(), String> = async {
        let mut state_file = read_state_file(backend.as_ref()).await?;
        if state_file
            .find_resource(&id.resource_type, &id.name)
            .is_some()
        {
            return Err(format!("{} is already managed", id));
        }

        println!("{}", format!("Importing {} ({})...", id, identifier).cyan());
        let state = provider
            .read(&id, Some(identifier))
            .await
            .map_err(|e| e.to_string())?;
        if !state.exists {
            return Err(format!("{} '{}' does not exist", id.resource_type, identifier));
        }
        state_file.upsert_resource(ResourceState::from_state(&state, PROVIDER_NAME));
        persist(backend.as_ref(), &mut state_file).await?;

        println!("{}", format!("✓ Imported {}.", id).green().bold());
        Ok(())
    }
    .await;

    let released = backend
        .release_lock(&lock)
        .await
        .map_err(|e| format!("Failed to release state lock: {}", e));
    result.and(released)
}

async fn run_state(command: StateCommands) -> Result<(), String> {
    match command {
        StateCommands::List { file } => {
            let parsed = load_config(&file)?;
            let backend = open_backend(&parsed).await?;
            let state_file = read_state_file(backend.as_ref()).await?;
            if state_file.resources.is_empty() {
                println!("{}", "No resources in state.".yellow());
                return Ok(());
            }
            for resource in &state_file.resources {
                let mut line = format!(
                    "{}  {}",
                    resource.resource_id(),
                    resource.identifier.as_deref().unwrap_or("-")
                );
                if resource.protected {
                    line.push_str("  [protected]");
                }
                println!("{}", line);
            }
            Ok(())
        }
        StateCommands::Show { binding, file } => {
            let parsed = load_config(&file)?;
            let backend = open_backend(&parsed).await?;
            let state_file = read_state_file(backend.as_ref()).await?;
            let resource = find_by_name(&state_file, &binding)?;
            let schemas = get_schemas();
            let schema = schemas.get(&resource.resource_type);

            println!("{}", resource.resource_id().to_string().cyan().bold());
            println!(
                "  identifier: {}",
                resource.identifier.as_deref().unwrap_or("-")
            );
            let mut keys: Vec<&String> = resource.attributes.keys().collect();
            keys.sort();
            for key in keys {
                let shown = if schema.is_some_and(|s| s.is_sensitive(key)) {
                    "(sensitive)".to_string()
                } else {
                    match json_to_value(&resource.attributes[key]) {
                        Some(value) => format_value(&value),
                        None => "null".to_string(),
                    }
                };
                println!("  {}: {}", key, shown);
            }
            Ok(())
        }
        StateCommands::Rm { binding, file } => {
            let parsed = load_config(&file)?;
            let backend = open_backend(&parsed).await?;
            let lock = backend
                .acquire_lock(LockOperation::StateRm)
                .await
                .map_err(|e| e.to_string())?;
            let result: Result<(), String> = async {
                let mut state_file = read_state_file(backend.as_ref()).await?;
                let id = find_by_name(&state_file, &binding)?.resource_id();
                state_file.remove_resource(&id.resource_type, &id.name);
                persist(backend.as_ref(), &mut state_file).await?;
                println!("{}", format!("✓ Removed {} from state.", id).green());
                Ok(())
            }
            .await;
            let released = backend
                .release_lock(&lock)
                .await
                .map_err(|e| format!("Failed to release state lock: {}", e));
            result.and(released)
        }
        StateCommands::ForceUnlock { lock_id, file } => {
            let parsed = load_config(&file)?;
            let backend = open_backend(&parsed).await?;
            backend
                .force_unlock(&lock_id)
                .await
                .map_err(|e| e.to_string())?;
            println!("{}", format!("✓ Lock {} released.", lock_id).green());
            Ok(())
        }
    }
}

fn find_by_name<'a>(state_file: &'a StateFile, name: &str) -> Result<&'a ResourceState, String> {
    let matches: Vec<&ResourceState> = state_file
        .resources
        .iter()
        .filter(|r| r.name == name)
        .collect();
    match matches.as_slice() {
        [] => Err(format!("No resource named '{}' in state", name)),
        [one] => Ok(one),
        _ => Err(format!("Several resources are named '{}' in state", name)),
    }
}

async fn run_sweep(prefix: &str, region: Option<&str>) -> Result<(), String> {
    let mut config = Config::from_env().map_err(|e| format!("Provider configuration error: {}", e))?;
    if let Some(region) = region {
        config.region = region.parse()?;
    }
    config
        .validate()
        .map_err(|e| format!("Provider configuration error: {}", e))?;
    let client = BaiduClient::new(config).map_err(|e| e.to_string())?;

    println!(
        "{}",
        format!("Sweeping objects named '{}*' in {}...", prefix, client.region()).cyan()
    );
    let report = sweeper::sweep(&client, prefix)
        .await
        .map_err(|e| e.to_string())?;

    for label in &report.deleted {
        println!("  {} {}", "✓".green(), label);
    }
    for (label, reason) in &report.failed {
        println!("  {} {} - {}", "✗".red(), label, reason);
    }
    println!();
    println!(
        "{} deleted, {} skipped, {} failed.",
        report.deleted.len().to_string().green(),
        report.skipped,
        report.failed.len().to_string().red()
    );

    if report.failed.is_empty() {
        Ok(())
    } else {
        Err(format!("{} objects could not be deleted", report.failed.len()))
    }
}

fn run_schema(resource_type: Option<&str>) -> Result<(), String> {
    let schemas = get_schemas();

    let Some(resource_type) = resource_type else {
        let mut names: Vec<&String> = schemas.keys().collect();
        names.sort();
        for name in names {
            let schema = &schemas[name];
            let kind = if schema.data_source {
                "data source"
            } else {
                "resource"
            };
            println!(
                "{}.{}  ({})  {}",
                PROVIDER_NAME,
                name.cyan(),
                kind,
                schema.description.as_deref().unwrap_or("")
            );
        }
        return Ok(());
    };

    let name = resource_type
        .strip_prefix(&format!("{}.", PROVIDER_NAME))
        .unwrap_or(resource_type);
    let schema = schemas
        .get(name)
        .ok_or_else(|| format!("Unknown resource type '{}'", resource_type))?;

    println!("{}", format!("{}.{}", PROVIDER_NAME, name).cyan().bold());
    if let Some(description) = &schema.description {
        println!("  {}", description);
    }
    println!();
    for attr in schema.sorted_attributes() {
        let mut flags = Vec::new();
        if attr.output_only {
            flags.push("output".to_string());
        } else if attr.required {
            flags.push("required".to_string());
        } else {
            flags.push("optional".to_string());
        }
        if attr.computed && !attr.output_only {
            flags.push("computed".to_string());
        }
        if attr.force_new {
            flags.push("forces replacement".to_string());
        }
        if attr.sensitive {
            flags.push("sensitive".to_string());
        }
        if let Some(default) = &attr.default {
            flags.push(format!("default {}", format_value(default)));
        }
        println!(
            "  {}: {} ({})",
            attr.name.bold(),
            attr.attr_type.type_name(),
            flags.join(", ")
        );
        if let Some(description) = &attr.description {
            println!("      {}", description.dimmed());
        }
    }
    if !schema.data_source {
        let t = &schema.timeouts;
        println!();
        println!(
            "  timeouts: create {}m, update {}m, delete {}m",
            t.create.as_secs() / 60,
            t.update.as_secs() / 60,
            t.delete.as_secs() / 60
        );
    }
    Ok(())
}

fn format_effect(effect: &Effect) -> String {
    match effect {
        Effect::Read(r) => format!("read {}", r.id),
        Effect::Create(r) => format!("create {}", r.id),
        Effect::Update { id, .. } => format!("update {}", id),
        Effect::Replace { id, .. } => format!("replace {}", id),
        Effect::Delete { id, identifier } => format!("delete {} ({})", id, identifier),
    }
}

fn print_plan(plan: &Plan, schemas: &HashMap<String, ResourceSchema>) {
    if plan.mutation_count() == 0 {
        println!("{}", "No changes. Infrastructure is up-to-date.".green());
        return;
    }

    println!("{}", "Execution Plan:".cyan().bold());
    println!();

    for effect in plan.effects() {
        let schema = schemas.get(&effect.resource_id().resource_type);
        let shown = |key: &str, value: Option<&Value>| -> String {
            match value {
                None => "(none)".to_string(),
                Some(_) if schema.is_some_and(|s| s.is_sensitive(key)) => "(sensitive)".to_string(),
                Some(Value::ResourceRef(binding, attr)) => {
                    format!("{}.{} (known after apply)", binding, attr)
                }
                Some(v) => format_value(v),
            }
        };

        match effect {
            Effect::Read(r) => {
                println!("  {} {}", "<=".cyan().bold(), r.id.to_string().cyan());
            }
            Effect::Create(r) => {
                println!("  {} {}", "+".green().bold(), r.id.to_string().cyan().bold());
                for key in display_keys(r.attributes.keys()) {
                    println!("      {}: {}", key, shown(key, r.get(key)).green());
                }
            }
            Effect::Update { id, from, to, changed } => {
                println!("  {} {}", "~".yellow().bold(), id.to_string().cyan().bold());
                for key in display_keys(changed.iter()) {
                    println!(
                        "      {}: {} → {}",
                        key,
                        shown(key, from.get(key)).red(),
                        shown(key, to.get(key)).green()
                    );
                }
            }
            Effect::Replace { id, from, to, changed } => {
                println!(
                    "  {} {} {}",
                    "-/+".magenta().bold(),
                    id.to_string().cyan().bold(),
                    "(must be replaced)".magenta()
                );
                for key in display_keys(changed.iter()) {
                    let forces = if schema.is_some_and(|s| s.is_force_new(key)) {
                        format!(" {}", "# forces replacement".red())
                    } else {
                        String::new()
                    };
                    println!(
                        "      {}: {} → {}{}",
                        key,
                        shown(key, from.get(key)).red(),
                        shown(key, to.get(key)).green(),
                        forces
                    );
                }
            }
            Effect::Delete { id, identifier } => {
                println!(
                    "  {} {} ({})",
                    "-".red().bold(),
                    id.to_string().cyan().bold(),
                    identifier
                );
            }
        }
    }

    println!();
    println!("{}", plan.summary().to_string().bold());
}

/// Visible attribute keys, `name` first
fn display_keys<'a>(keys: impl Iterator<Item = &'a String>) -> Vec<&'a str> {
    let mut keys: Vec<&str> = keys
        .map(String::as_str)
        .filter(|k| !k.starts_with('_'))
        .collect();
    keys.sort_by(|a, b| match (*a, *b) {
        ("name", _) => std::cmp::Ordering::Less,
        (_, "name") => std::cmp::Ordering::Greater,
        _ => a.cmp(b),
    });
    keys
}

fn format_value(value: &Value) -> String {
    match value {
        Value::String(s) => format!("\"{}\"", s),
        Value::Int(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::List(items) => {
            let strs: Vec<_> = items.iter().map(format_value).collect();
            format!("[{}]", strs.join(", "))
        }
        Value::Map(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            let strs: Vec<_> = entries
                .into_iter()
                .map(|(k, v)| format!("{}: {}", k, format_value(v)))
                .collect();
            format!("{{{}}}", strs.join(", "))
        }
        Value::ResourceRef(binding, attr) => format!("{}.{}", binding, attr),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bcform_core::differ::{Diff, diff};

    fn parse(src: &str) -> ParsedFile {
        parser::parse_and_resolve(src).unwrap()
    }

    #[test]
    fn verbosity_maps_to_levels() {
        assert_eq!(log_level(0), "warn");
        assert_eq!(log_level(1), "info");
        assert_eq!(log_level(2), "debug");
        assert_eq!(log_level(7), "trace");
    }

    #[test]
    fn validation_reports_every_problem() {
        let parsed = parse(
            r#"
            let lb = baiducloud.blb {
              name = "web"
            }

            let nat = baiducloud.nat_gateway {
              name = "out"
            }

            let groups = baiducloud.ccev2_instance_groups {
              cluster_id = "cce-1"
            }
            "#,
        );

        let err = validate_parsed(&parsed, &get_schemas()).unwrap_err();

        assert!(err.contains("blb.lb"));
        assert!(err.contains("vpc_id"));
        assert!(err.contains("unknown resource type 'nat_gateway'"));
        assert!(err.contains("declare it with 'read'"));
    }

    #[test]
    fn valid_configuration_passes() {
        let parsed = parse(
            r#"
            provider baiducloud {
              region = "bj"
            }

            let lb = baiducloud.blb {
              name      = "web"
              vpc_id    = "vpc-1"
              subnet_id = "sbn-1"
            }

            let http = baiducloud.blb_listener {
              blb_id        = lb.id
              listener_port = 80
              backend_port  = 8080
              protocol      = "HTTP"
              scheduler     = "RoundRobin"
            }
            "#,
        );

        assert!(validate_parsed(&parsed, &get_schemas()).is_ok());
    }

    #[test]
    fn stored_secrets_fill_gaps_in_read() {
        let schemas = get_schemas();
        let id = ResourceId::new("cert", "site");
        let read = State::existing(
            id.clone(),
            HashMap::from([("cert_name".to_string(), Value::from("site"))]),
        )
        .with_identifier("cert-1");
        let stored = ResourceState::new("cert", "site", PROVIDER_NAME)
            .with_identifier("cert-1")
            .with_attribute("cert_name", serde_json::json!("old"))
            .with_attribute("cert_private_data", serde_json::json!("KEY"));

        let state = overlay_stored(read, Some(&stored), schemas.get("cert"));

        assert_eq!(state.get("cert_name"), Some(&Value::from("site")));
        assert_eq!(state.get("cert_private_data"), Some(&Value::from("KEY")));

        let gone = overlay_stored(State::not_found(id), Some(&stored), schemas.get("cert"));
        assert!(gone.attributes.is_empty());
    }

    #[test]
    fn cleared_description_shows_as_drift() {
        let schemas = get_schemas();
        let read = State::existing(
            ResourceId::new("blb", "web"),
            HashMap::from([("name".to_string(), Value::from("web"))]),
        )
        .with_identifier("lb-1");
        let stored = ResourceState::new("blb", "web", PROVIDER_NAME)
            .with_identifier("lb-1")
            .with_attribute("name", serde_json::json!("web"))
            .with_attribute("description", serde_json::json!("web tier"))
            .with_attribute("eip", serde_json::json!("180.76.1.1"));

        let state = overlay_stored(read, Some(&stored), schemas.get("blb"));
        assert_eq!(state.get("description"), None);
        assert_eq!(state.get("eip"), Some(&Value::from("180.76.1.1")));

        let desired = Resource::new("blb", "web")
            .with_attribute("name", Value::from("web"))
            .with_attribute("description", Value::from("web tier"))
            .with_attribute("eip", Value::from("180.76.1.1"));
        match diff(&desired, &state, schemas.get("blb")) {
            Diff::Update {
                changed_attributes, ..
            } => assert_eq!(changed_attributes, vec!["description"]),
            other => panic!("Expected Update, got {:?}", other),
        }
    }

    #[test]
    fn protected_resources_are_not_deleted() {
        let mut state_file = StateFile::new();
        state_file.upsert_resource(
            ResourceState::new("blb", "lb", PROVIDER_NAME)
                .with_identifier("lb-1")
                .with_protected(true),
        );
        state_file.upsert_resource(
            ResourceState::new("cert", "tls", PROVIDER_NAME).with_identifier("cert-1"),
        );
        let mut plan = Plan::new();
        plan.add(Effect::Delete {
            id: ResourceId::new("blb", "lb"),
            identifier: "lb-1".to_string(),
        });
        plan.add(Effect::Delete {
            id: ResourceId::new("cert", "tls"),
            identifier: "cert-1".to_string(),
        });

        let plan = without_protected(plan, &state_file);

        assert_eq!(plan.effects().len(), 1);
        assert_eq!(plan.effects()[0].resource_id(), &ResourceId::new("cert", "tls"));
    }

    #[test]
    fn outcomes_update_state() {
        let mut state_file = StateFile::new();
        let state = State::existing(
            ResourceId::new("deployset", "spread"),
            HashMap::from([("strategy".to_string(), Value::from("HOST_HA"))]),
        )
        .with_identifier("dset-1");

        record_outcome(&mut state_file, &EffectOutcome::Created { state });
        let stored = state_file.find_resource("deployset", "spread").unwrap();
        assert_eq!(stored.identifier.as_deref(), Some("dset-1"));

        record_outcome(
            &mut state_file,
            &EffectOutcome::Deleted {
                id: ResourceId::new("deployset", "spread"),
            },
        );
        assert!(state_file.resources.is_empty());
    }

    #[test]
    fn name_sorts_first() {
        let keys = [
            "vpc_id".to_string(),
            "_binding".to_string(),
            "name".to_string(),
            "eip".to_string(),
        ];
        assert_eq!(display_keys(keys.iter()), vec!["name", "eip", "vpc_id"]);
    }

    #[test]
    fn values_format_like_source() {
        let value = Value::Map(HashMap::from([
            ("b".to_string(), Value::Int(2)),
            ("a".to_string(), Value::List(vec![Value::from("x"), Value::Bool(true)])),
        ]));
        assert_eq!(format_value(&value), "{a: [\"x\", true], b: 2}");
    }

    #[test]
    fn state_lookup_by_name() {
        let mut state_file = StateFile::new();
        state_file.upsert_resource(ResourceState::new("blb", "lb", PROVIDER_NAME));
        assert_eq!(find_by_name(&state_file, "lb").unwrap().resource_type, "blb");
        assert!(find_by_name(&state_file, "missing").is_err());
    }
}
