use std::{str::FromStr, sync::Arc};

use anyhow::{Context, Result};
use build_order_engine::{
    config::{self, AppConfig},
    db::{self, DbPool},
    entities::BuildStatus,
    events::{process_events, EventSender},
    serials::parse_serials,
    services::{
        allocation::{AllocateRequest, UnallocateFilter},
        auto_allocation::AutoAllocateOptions,
        builds::NewBuild,
        catalog::{NewBomItem, NewPart},
        lifecycle::LifecycleHooks,
        stock::NewStockItem,
    },
    BuildEngine,
};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use rust_decimal::{prelude::ToPrimitive, Decimal};
use serde::Serialize;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let context = CliContext::initialize().await?;

    match cli.command {
        Commands::Migrate => {
            db::run_migrations(&context.db)
                .await
                .context("failed to run migrations")?;
            println!("Migrations applied");
        }
        Commands::Part(command) => handle_part_command(&context, command, cli.json).await?,
        Commands::Bom(command) => handle_bom_command(&context, command, cli.json).await?,
        Commands::Location(command) => {
            handle_location_command(&context, command, cli.json).await?
        }
        Commands::Stock(command) => handle_stock_command(&context, command, cli.json).await?,
        Commands::Build(command) => handle_build_command(&context, command, cli.json).await?,
    }

    Ok(())
}

#[derive(Parser)]
#[command(
    name = "build-order-cli",
    about = "Manage build orders, stock allocation and build completion",
    version
)]
struct Cli {
    #[arg(
        long,
        global = true,
        action = ArgAction::SetTrue,
        help = "Render command output as pretty JSON"
    )]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply database migrations
    Migrate,
    #[command(subcommand)]
    Part(PartCommands),
    #[command(subcommand)]
    Bom(BomCommands),
    #[command(subcommand)]
    Location(LocationCommands),
    #[command(subcommand)]
    Stock(StockCommands),
    #[command(subcommand)]
    Build(BuildCommands),
}

#[derive(Subcommand)]
enum PartCommands {
    Add(AddPartArgs),
    /// List every part that is a variant of a template, at any depth
    Variants(PartIdArgs),
}

#[derive(Args)]
struct PartIdArgs {
    #[arg(long = "id", help = "Part id")]
    part_id: i64,
}

#[derive(Args)]
struct AddPartArgs {
    #[arg(long, help = "Part name")]
    name: String,
    #[arg(long, help = "Optional description")]
    description: Option<String>,
    #[arg(long, action = ArgAction::SetTrue, help = "Instances carry unique serial numbers")]
    trackable: bool,
    #[arg(long, action = ArgAction::SetTrue, help = "Part can be built from a BOM")]
    assembly: bool,
    #[arg(long, action = ArgAction::SetTrue, help = "Part can be used in other BOMs")]
    component: bool,
    #[arg(long, help = "Template part this part is a variant of")]
    variant_of: Option<i64>,
}

#[derive(Subcommand)]
enum BomCommands {
    Add(AddBomArgs),
}

#[derive(Args)]
struct AddBomArgs {
    #[arg(long, help = "Assembly part id")]
    part: i64,
    #[arg(long, help = "Component part id")]
    sub_part: i64,
    #[arg(long, value_parser = parse_decimal, help = "Quantity per assembly")]
    quantity: Decimal,
    #[arg(long, value_parser = parse_decimal, help = "Fixed quantity per build")]
    setup_quantity: Option<Decimal>,
    #[arg(long, value_parser = parse_decimal, help = "Round requirements up to this multiple")]
    rounding_multiple: Option<Decimal>,
    #[arg(long, action = ArgAction::SetTrue, help = "Accept stock of variant parts")]
    allow_variants: bool,
    #[arg(long, action = ArgAction::SetTrue)]
    optional: bool,
    #[arg(long, action = ArgAction::SetTrue)]
    consumable: bool,
    #[arg(long, action = ArgAction::SetTrue, help = "Line applies to variants of the assembly")]
    inherited: bool,
}

#[derive(Subcommand)]
enum LocationCommands {
    Add(AddLocationArgs),
}

#[derive(Args)]
struct AddLocationArgs {
    #[arg(long)]
    name: String,
    #[arg(long, help = "Parent location id")]
    parent: Option<i64>,
}

#[derive(Subcommand)]
enum StockCommands {
    Receive(ReceiveStockArgs),
    History(StockItemArgs),
}

#[derive(Args)]
struct ReceiveStockArgs {
    #[arg(long)]
    part: i64,
    #[arg(long, value_parser = parse_decimal)]
    quantity: Decimal,
    #[arg(long)]
    location: Option<i64>,
    #[arg(long)]
    serial: Option<String>,
    #[arg(long)]
    batch: Option<String>,
}

#[derive(Args)]
struct StockItemArgs {
    #[arg(long = "id", help = "Stock item id")]
    stock_item_id: i64,
}

#[derive(Subcommand)]
enum BuildCommands {
    Create(CreateBuildArgs),
    List(ListBuildsArgs),
    Status(BuildIdArgs),
    Allocate(AllocateArgs),
    AutoAllocate(AutoAllocateArgs),
    Unallocate(UnallocateArgs),
    Complete(CompleteArgs),
    Cancel(CancelArgs),
}

#[derive(Args)]
struct CreateBuildArgs {
    #[arg(long)]
    reference: String,
    #[arg(long)]
    part: i64,
    #[arg(long, value_parser = parse_decimal)]
    quantity: Decimal,
    #[arg(long)]
    title: Option<String>,
    #[arg(long, help = "Location tree stock is taken from")]
    take_from: Option<i64>,
    #[arg(long, help = "Location outputs are stored in")]
    destination: Option<i64>,
    #[arg(long)]
    batch: Option<String>,
}

#[derive(Args)]
struct ListBuildsArgs {
    #[arg(long, value_enum)]
    status: Option<StatusArg>,
}

#[derive(Clone, Copy, ValueEnum)]
enum StatusArg {
    Pending,
    Complete,
    Cancelled,
}

impl From<StatusArg> for BuildStatus {
    fn from(status: StatusArg) -> Self {
        match status {
            StatusArg::Pending => BuildStatus::Pending,
            StatusArg::Complete => BuildStatus::Complete,
            StatusArg::Cancelled => BuildStatus::Cancelled,
        }
    }
}

#[derive(Args)]
struct BuildIdArgs {
    #[arg(long = "id", help = "Build id")]
    build_id: i64,
}

#[derive(Args)]
struct AllocateArgs {
    #[arg(long)]
    line: i64,
    #[arg(long)]
    stock_item: i64,
    #[arg(long, value_parser = parse_decimal)]
    quantity: Decimal,
    #[arg(long, help = "Serial of the output this unit is installed into")]
    install_into: Option<String>,
}

#[derive(Args)]
struct AutoAllocateArgs {
    #[arg(long = "id", help = "Build id")]
    build_id: i64,
    #[arg(long, help = "Only take stock from this location tree")]
    location: Option<i64>,
    #[arg(long, help = "Never take stock from this location tree")]
    exclude_location: Option<i64>,
    #[arg(long, action = ArgAction::SetTrue, help = "Also fill optional lines")]
    optional_items: bool,
    #[arg(long, action = ArgAction::SetTrue, help = "Print proposals without allocating")]
    dry_run: bool,
}

#[derive(Args)]
struct UnallocateArgs {
    #[arg(long = "id", help = "Build id")]
    build_id: i64,
    #[arg(long, help = "Only release reservations for this component part")]
    part: Option<i64>,
    #[arg(long, help = "Only release reservations designated for this output serial")]
    install_into: Option<String>,
}

#[derive(Args)]
struct CompleteArgs {
    #[arg(long = "id", help = "Build id")]
    build_id: i64,
    #[arg(long, help = "Serial expression for the outputs, e.g. '1-10'")]
    serials: Option<String>,
    #[arg(long, default_value = "cli")]
    user: String,
}

#[derive(Args)]
struct CancelArgs {
    #[arg(long = "id", help = "Build id")]
    build_id: i64,
    #[arg(long, default_value = "cli")]
    user: String,
}

struct CliContext {
    _config: AppConfig,
    db: Arc<DbPool>,
    engine: BuildEngine,
}

impl CliContext {
    async fn initialize() -> Result<Self> {
        let config = config::load_config().context("failed to load application config")?;
        config::init_tracing(config.log_level(), config.log_json);

        let db_pool = db::establish_connection_from_app_config(&config)
            .await
            .context("failed to connect to database")?;
        db::check_connection(&db_pool)
            .await
            .context("database is not reachable")?;
        if config.auto_migrate {
            db::run_migrations(&db_pool)
                .await
                .context("failed to run migrations")?;
        }
        let db = Arc::new(db_pool);

        let (event_sender, event_rx) = EventSender::channel(config.engine.event_channel_capacity);
        tokio::spawn(process_events(event_rx));

        let engine = BuildEngine::new(
            db.clone(),
            config.engine.clone(),
            LifecycleHooks::default(),
            Some(event_sender),
        );

        Ok(Self {
            _config: config,
            db,
            engine,
        })
    }
}

async fn handle_part_command(context: &CliContext, command: PartCommands, json: bool) -> Result<()> {
    match command {
        PartCommands::Add(args) => {
            let part = context
                .engine
                .catalog
                .create_part(NewPart {
                    name: args.name,
                    description: args.description,
                    trackable: args.trackable,
                    is_assembly: args.assembly,
                    is_component: args.component,
                    variant_of: args.variant_of,
                })
                .await
                .context("failed to create part")?;
            render(json, &part, || println!("Created part {} ({})", part.id, part.name))
        }
        PartCommands::Variants(args) => {
            let variants = context
                .engine
                .catalog
                .variants_of(args.part_id)
                .await
                .context("failed to load variants")?;
            render(json, &variants, || {
                if variants.is_empty() {
                    println!("Part {} has no variants", args.part_id);
                }
                for id in &variants {
                    println!("- part {}", id);
                }
            })
        }
    }
}

async fn handle_bom_command(context: &CliContext, command: BomCommands, json: bool) -> Result<()> {
    match command {
        BomCommands::Add(args) => {
            let mut input = NewBomItem::new(args.part, args.sub_part, args.quantity);
            input.setup_quantity = args.setup_quantity.unwrap_or_default();
            input.rounding_multiple = args.rounding_multiple;
            input.allow_variants = args.allow_variants;
            input.optional = args.optional;
            input.consumable = args.consumable;
            input.inherited = args.inherited;

            let item = context
                .engine
                .catalog
                .add_bom_item(input)
                .await
                .context("failed to add BOM item")?;
            render(json, &item, || {
                println!(
                    "Added BOM item {}: {} x part {} per part {}",
                    item.id, item.quantity, item.sub_part_id, item.part_id
                )
            })
        }
    }
}

async fn handle_location_command(
    context: &CliContext,
    command: LocationCommands,
    json: bool,
) -> Result<()> {
    match command {
        LocationCommands::Add(args) => {
            let location = context
                .engine
                .stock
                .create_location(&args.name, args.parent)
                .await
                .context("failed to create location")?;
            render(json, &location, || {
                println!("Created location {} ({})", location.id, location.name)
            })
        }
    }
}

async fn handle_stock_command(context: &CliContext, command: StockCommands, json: bool) -> Result<()> {
    match command {
        StockCommands::Receive(args) => {
            let mut input = NewStockItem::new(args.part, args.quantity);
            input.location_id = args.location;
            input.serial = args.serial;
            input.batch = args.batch;

            let item = context
                .engine
                .stock
                .receive_stock(input)
                .await
                .context("failed to receive stock")?;
            render(json, &item, || {
                println!(
                    "Received stock item {}: {} of part {}",
                    item.id, item.quantity, item.part_id
                )
            })
        }
        StockCommands::History(args) => {
            let history = context
                .engine
                .stock
                .stock_history(args.stock_item_id)
                .await
                .context("failed to load stock history")?;
            render(json, &history, || {
                for entry in &history {
                    println!(
                        "- {} {:?} qty {} build {:?}",
                        entry.created_at, entry.tracking_type, entry.quantity, entry.build_id
                    );
                }
            })
        }
    }
}

async fn handle_build_command(context: &CliContext, command: BuildCommands, json: bool) -> Result<()> {
    let engine = &context.engine;

    match command {
        BuildCommands::Create(args) => {
            let mut input = NewBuild::new(args.reference, args.part, args.quantity);
            input.title = args.title;
            input.take_from_id = args.take_from;
            input.destination_id = args.destination;
            input.batch = args.batch;

            let (build, lines) = engine
                .builds
                .create_build(input)
                .await
                .context("failed to create build")?;

            #[derive(Serialize)]
            struct Created<'a> {
                build: &'a build_order_engine::entities::build::Model,
                lines: &'a [build_order_engine::entities::build_line::Model],
            }
            render(json, &Created { build: &build, lines: &lines }, || {
                println!("Created build {} ({}) with {} lines", build.id, build.reference, lines.len());
                for line in &lines {
                    println!("- line {}: BOM item {} requires {}", line.id, line.bom_item_id, line.quantity);
                }
            })
        }
        BuildCommands::List(args) => {
            let builds = engine
                .builds
                .list_builds(args.status.map(BuildStatus::from))
                .await
                .context("failed to list builds")?;
            render(json, &builds, || {
                for build in &builds {
                    println!(
                        "- build {} ({}) {} x part {} {}",
                        build.id, build.reference, build.quantity, build.part_id, build.status
                    );
                }
            })
        }
        BuildCommands::Status(args) => {
            let build = engine.builds.get_build(args.build_id).await.context("failed to load build")?;
            let lines = engine
                .builds
                .line_allocations(args.build_id)
                .await
                .context("failed to load build lines")?;

            #[derive(Serialize)]
            struct Status<'a> {
                build: &'a build_order_engine::entities::build::Model,
                lines: &'a [build_order_engine::services::requirements::LineAllocation],
                fully_allocated: bool,
            }
            let fully_allocated = lines.iter().all(|l| l.is_fully_allocated());
            render(
                json,
                &Status {
                    build: &build,
                    lines: &lines,
                    fully_allocated,
                },
                || {
                    println!(
                        "Build {} ({}) • {} x part {} • {}",
                        build.id, build.reference, build.quantity, build.part_id, build.status
                    );
                    for line in &lines {
                        println!(
                            "- line {} part {}: {}/{}{}",
                            line.line.id,
                            line.part_id(),
                            line.allocated,
                            line.required(),
                            if line.bom_item.consumable { " (consumable)" } else { "" }
                        );
                    }
                    println!("Fully allocated: {}", fully_allocated);
                },
            )
        }
        BuildCommands::Allocate(args) => {
            let mut request = AllocateRequest::new(args.line, args.stock_item, args.quantity);
            request.install_into = args.install_into;

            let item = engine
                .allocation
                .allocate(request)
                .await
                .context("failed to allocate stock")?;
            render(json, &item, || {
                println!(
                    "Allocation {}: {} of stock item {} to line {}",
                    item.id, item.quantity, item.stock_item_id, item.build_line_id
                )
            })
        }
        BuildCommands::AutoAllocate(args) => {
            let options = AutoAllocateOptions {
                location_id: args.location,
                exclude_location_id: args.exclude_location,
                optional_items: args.optional_items,
            };
            let proposals = if args.dry_run {
                engine.auto_allocation.propose_auto_allocations(args.build_id, options).await
            } else {
                engine.auto_allocation.commit_auto_allocations(args.build_id, options).await
            }
            .context("failed to auto-allocate")?;

            render(json, &proposals, || {
                let verb = if args.dry_run { "Would allocate" } else { "Allocated" };
                for p in &proposals {
                    println!(
                        "{} {} of stock item {} to line {}",
                        verb, p.quantity, p.stock_item_id, p.build_line_id
                    );
                }
                if proposals.is_empty() {
                    println!("Nothing to allocate");
                }
            })
        }
        BuildCommands::Unallocate(args) => {
            let removed = engine
                .allocation
                .unallocate_all(
                    args.build_id,
                    UnallocateFilter {
                        part_id: args.part,
                        install_into: args.install_into,
                    },
                )
                .await
                .context("failed to remove allocations")?;
            render(json, &serde_json::json!({ "removed": removed }), || {
                println!("Removed {} allocations", removed)
            })
        }
        BuildCommands::Complete(args) => {
            let serials = match &args.serials {
                Some(expr) => {
                    let build = engine.builds.get_build(args.build_id).await.context("failed to load build")?;
                    let expected = build.quantity.to_usize();
                    Some(parse_serials(expr, expected).context("invalid serial expression")?)
                }
                None => None,
            };

            let outputs = engine
                .completion
                .complete_build(args.build_id, serials, &args.user)
                .await
                .context("failed to complete build")?;
            render(json, &outputs, || {
                println!("Build {} completed with {} outputs", args.build_id, outputs.len());
                for output in &outputs {
                    println!(
                        "- stock item {} qty {} serial {}",
                        output.id,
                        output.quantity,
                        output.serial.as_deref().unwrap_or("-")
                    );
                }
            })
        }
        BuildCommands::Cancel(args) => {
            let build = engine
                .cancellation
                .cancel_build(args.build_id, &args.user)
                .await
                .context("failed to cancel build")?;
            render(json, &build, || println!("Build {} is {}", build.id, build.status))
        }
    }
}

fn render<T: Serialize>(json: bool, value: &T, text: impl FnOnce()) -> Result<()> {
    if json {
        print_json(value)
    } else {
        text();
        Ok(())
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn parse_decimal(raw: &str) -> Result<Decimal, String> {
    Decimal::from_str(raw).map_err(|_| format!("invalid decimal '{raw}'"))
}
