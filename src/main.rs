use promptx::app::{App, STORE_FILE};
use promptx::cli::{parse_where, Cli, Commands, ConfigAction};
use promptx::collection::QueryOptions;
use promptx::config::Config;
use promptx::entity::{Entity, EntityDef};
use promptx::error::{PxError, Result};
use promptx::schema::create_entities;
use promptx::store::Database;
use serde_json::Value;
use std::path::{Path, PathBuf};

fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse_args();

    let config = load_config(cli.config.clone(), cli.profile.clone())?;
    init_logging(&config, cli.verbose)?;

    let root = cli
        .path
        .clone()
        .unwrap_or_else(|| config.storage.root.clone());

    match cli.command {
        Commands::Init => cmd_init(&root, config)?,
        Commands::Collections => cmd_collections(&root, config)?,
        Commands::Embed {
            collection,
            file,
            schema,
        } => cmd_embed(&root, config, &collection, &file, schema.as_deref())?,
        Commands::Show { collection, json } => cmd_show(&root, config, &collection, json)?,
        Commands::Query {
            collection,
            texts,
            filter,
            limit,
            threshold,
            json,
        } => {
            let mut options = QueryOptions::new()
                .texts(texts)
                .threshold(threshold.unwrap_or(config.retrieval.threshold))
                .n_results(config.retrieval.n_results);
            if let Some(filter) = parse_where(&filter)? {
                options = options.filter(filter);
            }
            if let Some(limit) = limit.or(config.retrieval.limit) {
                options = options.limit(limit);
            }
            cmd_query(&root, config, &collection, &options, json)?;
        }
        Commands::Drop { collection } => cmd_drop(&root, config, &collection)?,
        Commands::Schema { file } => cmd_schema(&file)?,
        Commands::Config { action } => cmd_config(cli.config, config, action)?,
    }

    Ok(())
}

fn init_logging(config: &Config, verbose: bool) -> Result<()> {
    use tracing_subscriber::{fmt, EnvFilter};

    let fallback = if verbose {
        "promptx=debug".to_string()
    } else {
        format!("promptx={}", config.logging.level)
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    match &config.logging.file {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent).map_err(|e| PxError::Io {
                    source: e,
                    context: format!("Failed to create log directory: {:?}", parent),
                })?;
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| PxError::Io {
                    source: e,
                    context: format!("Failed to open log file: {:?}", path),
                })?;
            fmt()
                .with_env_filter(filter)
                .with_target(false)
                .with_ansi(false)
                .with_writer(std::sync::Mutex::new(file))
                .init();
        }
        None => {
            fmt()
                .with_env_filter(filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
    }
    Ok(())
}

fn cmd_init(root: &Path, config: Config) -> Result<()> {
    let pool_size = config.storage.pool_size;
    let app = App::open(root, config)?;
    let db_path = Config::db_dir(app.root()).join(STORE_FILE);
    let stats = Database::new(&db_path, pool_size)?.stats()?;

    println!("✓ Store ready at: {}", db_path.display());
    println!("  Collections: {}", stats.collection_count);
    println!(
        "  Records: {} ({} documents)",
        stats.record_count, stats.document_count
    );
    Ok(())
}

fn cmd_collections(root: &Path, config: Config) -> Result<()> {
    let app = App::open(root, config)?;
    let names = app.collection_names()?;
    if names.is_empty() {
        println!("No collections");
        return Ok(());
    }
    for name in names {
        let collection = app.find_collection(&name)?;
        println!("{} ({} entities)", name, collection.len());
    }
    Ok(())
}

fn cmd_embed(
    root: &Path,
    config: Config,
    collection: &str,
    file: &Path,
    schema: Option<&Path>,
) -> Result<()> {
    let data = read_json(file)?;
    let entities = match schema {
        Some(schema_path) => create_entities(&read_json(schema_path)?, data)?,
        None => {
            let items = match data {
                Value::Array(items) => items,
                other => vec![other],
            };
            items
                .into_iter()
                .map(|item| Entity::from_value(item, collection, None))
                .collect::<Result<Vec<_>>>()?
        }
    };

    let app = App::open(root, config)?;
    let mut target = app.collection(collection)?;
    let added = target.embed(&entities)?;

    println!(
        "✓ Embedded {} entities into {} ({} new)",
        entities.len(),
        collection,
        added
    );
    Ok(())
}

fn cmd_show(root: &Path, config: Config, collection: &str, json: bool) -> Result<()> {
    let app = App::open(root, config)?;
    let entities = app.find_collection(collection)?.objects()?;
    print_entities(&entities, None, json)
}

fn cmd_query(
    root: &Path,
    config: Config,
    collection: &str,
    options: &QueryOptions,
    json: bool,
) -> Result<()> {
    let app = App::open(root, config)?;
    let Some(result) = app.find_collection(collection)?.embedding_query(options)? else {
        println!("No results");
        return Ok(());
    };
    let entities = result.objects()?;
    print_entities(&entities, Some(result.scores()), json)
}

fn cmd_drop(root: &Path, config: Config, collection: &str) -> Result<()> {
    let app = App::open(root, config)?;
    app.drop_collection(collection)?;
    println!("✓ Dropped collection {}", collection);
    Ok(())
}

fn cmd_schema(file: &Path) -> Result<()> {
    let schema = read_json(file)?;
    let def = EntityDef::from_json_schema(&schema)?;

    println!("{} (type: {})", def.title, def.type_name());
    for field in &def.fields {
        let mut line = format!(
            "  - {}: {} (required: {})",
            field.name,
            field.ty.display_name(),
            field.required
        );
        if let Some(default) = &field.default {
            line.push_str(&format!(", default: {}", default));
        }
        if !field.embed {
            line.push_str(", not embedded");
        }
        if let Some(description) = &field.description {
            line.push_str(&format!(": {}", description));
        }
        println!("{}", line);
    }
    Ok(())
}

fn cmd_config(config_path: Option<PathBuf>, config: Config, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show { section } => {
            let value = serde_json::to_value(&config)
                .map_err(|e| PxError::json(e, "Failed to serialize config"))?;
            let shown = match &section {
                Some(name) => value
                    .get(name)
                    .cloned()
                    .ok_or_else(|| PxError::not_found("Config section", name.clone()))?,
                None => value,
            };
            let json = serde_json::to_string_pretty(&shown)
                .map_err(|e| PxError::json(e, "Failed to serialize config"))?;
            println!("{}", json);
        }
        ConfigAction::Validate { file } => {
            let path = match file.or(config_path) {
                Some(path) => path,
                None => Config::default_path()?,
            };
            let config = Config::load(&path)?;
            println!("✓ Configuration is valid");
            println!("  Schema version: {}", config.meta.schema_version);
        }
        ConfigAction::Init { force } => {
            let path = match config_path {
                Some(path) => path,
                None => Config::default_path()?,
            };

            if path.exists() && !force {
                println!("Configuration file already exists at: {}", path.display());
                println!("Use --force to overwrite");
                return Ok(());
            }

            Config::default().save(&path)?;
            println!("✓ Configuration initialized at: {}", path.display());
        }
    }

    Ok(())
}

fn load_config(config_path: Option<PathBuf>, profile: Option<String>) -> Result<Config> {
    let path = match config_path {
        Some(path) => path,
        None => Config::default_path()?,
    };

    let mut config = Config::load_or_default(&path)?;
    if let Some(profile) = profile {
        config.apply_profile(&profile)?;
        promptx::config::ConfigValidator::validate(&config)?;
    }
    Ok(config)
}

fn read_json(path: &Path) -> Result<Value> {
    let content = std::fs::read_to_string(path).map_err(|e| PxError::Io {
        source: e,
        context: format!("Failed to read {:?}", path),
    })?;
    serde_json::from_str(&content).map_err(|e| PxError::Json {
        source: e,
        context: format!("Failed to parse {:?}", path),
    })
}

fn print_entities(entities: &[Entity], scores: Option<&[f32]>, json: bool) -> Result<()> {
    if json {
        let values: Vec<Value> = entities
            .iter()
            .enumerate()
            .map(|(i, entity)| {
                let mut value = entity.to_value();
                if let (Some(score), Value::Object(map)) =
                    (scores.and_then(|s| s.get(i)), &mut value)
                {
                    map.insert("_score".to_string(), Value::from(*score));
                }
                value
            })
            .collect();
        let text = serde_json::to_string_pretty(&values)
            .map_err(|e| PxError::json(e, "Failed to serialize entities"))?;
        println!("{}", text);
        return Ok(());
    }

    if entities.is_empty() {
        println!("No entities");
        return Ok(());
    }
    for (i, entity) in entities.iter().enumerate() {
        match scores.and_then(|s| s.get(i)) {
            Some(score) => println!("[{:.3}] {} ({})", score, entity.id, entity.entity_type),
            None => println!("{} ({})", entity.id, entity.entity_type),
        }
        for (name, value) in entity.fields() {
            println!("    {}: {}", name, value);
        }
    }
    Ok(())
}
