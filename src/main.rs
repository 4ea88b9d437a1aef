use std::{future::IntoFuture, process, sync::Arc};

use spacetraveling::{
    application::{
        error::AppError,
        listing::ListingService,
        load_more::PaginationController,
        paths::{StaticPathPlanner, StaticPathSet},
        render::{PageRenderer, PostPageRenderer},
        repos::{ContentRepository, TypeFilter},
        revalidate::{RevalidatingPages, RevalidationPolicy},
        site::SiteBuilder,
    },
    config,
    domain::posts::PostSummary,
    infra::{
        client::ListingClient,
        error::InfraError,
        http::{self, HttpState},
        prismic::PrismicRepository,
        telemetry,
    },
};
use time::OffsetDateTime;
use tokio::sync::watch;
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(stage = error.stage(), error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(stage = error.stage(), error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::validation(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Build(_) => run_build(settings).await,
        config::Command::Browse(args) => run_browse(args).await,
    }
}

struct Repository {
    repo: Arc<dyn ContentRepository>,
    filter: TypeFilter,
}

fn init_repository(settings: &config::Settings) -> Result<Repository, AppError> {
    settings
        .repository
        .require_endpoint()
        .map_err(|err| AppError::validation(err.to_string()))?;
    let repo = PrismicRepository::new(&settings.repository)?;
    Ok(Repository {
        repo: Arc::new(repo),
        filter: TypeFilter::new(settings.repository.document_type.clone()),
    })
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let Repository { repo, filter } = init_repository(&settings)?;
    let policy = RevalidationPolicy::new(settings.revalidation.window);

    let plan = StaticPathPlanner::new(Arc::clone(&repo), filter.clone(), settings.build.fallback)
        .plan_paths()
        .await?;
    let renderer: Arc<dyn PageRenderer> = Arc::new(PostPageRenderer::new(
        Arc::clone(&repo),
        filter.document_type.clone(),
    ));
    let pages = Arc::new(RevalidatingPages::new(
        renderer,
        policy,
        StaticPathSet::from(&plan),
    ));
    pages
        .warm(plan.paths.iter().map(String::as_str), OffsetDateTime::now_utc())
        .await?;

    let listing = Arc::new(ListingService::new(
        repo,
        filter,
        settings.repository.listing_page_size.get(),
    ));

    serve_http(&settings, HttpState { listing, pages }).await
}

async fn serve_http(settings: &config::Settings, state: HttpState) -> Result<(), AppError> {
    let router = http::build_router(state);
    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    info!(
        target = "spacetraveling::server",
        addr = %settings.server.addr,
        "listening"
    );

    let (stop_tx, mut stop_rx) = watch::channel(false);
    let server = axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            let _ = stop_tx.send(true);
        })
        .into_future();

    let grace = settings.server.graceful_shutdown;
    let deadline = async move {
        let _ = stop_rx.wait_for(|stopping| *stopping).await;
        tokio::time::sleep(grace).await;
    };

    tokio::select! {
        result = server => {
            result.map_err(|err| AppError::unexpected(format!("server error: {err}")))?;
        }
        () = deadline => {
            warn!(
                target = "spacetraveling::server",
                grace_seconds = grace.as_secs(),
                "graceful shutdown timed out; dropping open connections"
            );
        }
    }

    info!(target = "spacetraveling::server", "server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(
            target = "spacetraveling::server",
            error = %err,
            "failed to listen for shutdown signal"
        );
        std::future::pending::<()>().await;
    }
    info!(target = "spacetraveling::server", "shutdown requested");
}

async fn run_build(settings: config::Settings) -> Result<(), AppError> {
    let Repository { repo, filter } = init_repository(&settings)?;
    let policy = RevalidationPolicy::new(settings.revalidation.window);

    let builder = SiteBuilder::new(
        ListingService::new(
            Arc::clone(&repo),
            filter.clone(),
            settings.repository.listing_page_size.get(),
        ),
        StaticPathPlanner::new(Arc::clone(&repo), filter.clone(), settings.build.fallback),
        Arc::new(PostPageRenderer::new(repo, filter.document_type)),
        policy,
    );

    let output_dir = settings.build.output_dir.as_path();
    info!(
        target = "spacetraveling::site",
        output = %output_dir.display(),
        "starting site build"
    );
    builder.build(output_dir).await?;
    Ok(())
}

async fn run_browse(args: config::BrowseArgs) -> Result<(), AppError> {
    let client = ListingClient::new(&args.site)?;
    let first = client.first_page().await?;
    let controller = PaginationController::new(client, first.page);

    let mut state = controller.state();
    print_posts(state.loaded());
    let mut printed = state.loaded().len();

    for _ in 0..args.max_loads {
        if state.is_terminal() {
            break;
        }
        state = controller.load_more().await?;
        print_posts(&state.loaded()[printed..]);
        printed = state.loaded().len();
    }

    let affordance = state.affordance();
    println!(
        "-- {printed} of {} posts loaded [{}]",
        state.total_count(),
        affordance.label
    );
    Ok(())
}

fn print_posts(posts: &[PostSummary]) {
    for post in posts {
        let published = post
            .published_at
            .map(|date| date.to_string())
            .unwrap_or_default();
        println!("{published:>12}  {}  by {}", post.title, post.author);
        if !post.subtitle.is_empty() {
            println!("{:>12}  {}", "", post.subtitle);
        }
    }
}
