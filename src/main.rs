use clap::{Parser, Subcommand};
use miette::{miette, Result};
use tracing_subscriber::{fmt, EnvFilter};

use routeguard::guard::descriptor::{HandlerRegistry, RequestDescriptor};
use routeguard::guard::gate::{Decision, Gate, GateRequest, Rejection};
use routeguard::guard::resolver;
use routeguard::guard::steps::ScenarioSteps;
use routeguard::guard::types::{split_list, Actor, Lifetime};
use routeguard::settings::Settings;

#[derive(Parser, Debug)]
#[command(
    name = "routeguard",
    version,
    about = "Inspect permission rules and simulate authorization decisions"
)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "routeguard.toml")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List permission names with their rules
    Permissions,
    /// Report every problem in the rule document
    Validate,
    /// Print the permissions that authorize a handler
    Resolve {
        /// Handler identifier, e.g. App.Http.Controllers.UsersController@edit
        handler: String,
    },
    /// Simulate the gate for one request
    Check {
        handler: String,
        /// Request path
        #[arg(long, default_value = "/")]
        path: String,
        /// Comma separated permissions of the actor; guest when omitted
        #[arg(long)]
        permission: Option<String>,
        /// Ask for a JSON error body
        #[arg(long)]
        json: bool,
        /// Pretend the controller defines a permissionDenied action
        #[arg(long)]
        denied_handler: bool,
    },
    /// Grant temporary permissions (testing environment only)
    Grant {
        /// Comma separated permission names
        permissions: String,
        /// Number of requests, -1 for unlimited
        #[arg(long, default_value_t = Lifetime::UNLIMITED_COUNTER, allow_hyphen_values = true)]
        lifetime: i64,
    },
    /// Clear temporary permissions (testing environment only)
    Reset,
}

fn main() -> Result<()> {
    // logging
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(env_filter).with_writer(std::io::stderr).init();

    let cli = Cli::parse();

    let settings = Settings::load(&cli.config)?;
    tracing::debug!(?settings, "Loaded configuration");

    match cli.command {
        Command::Permissions => permissions(&settings),
        Command::Validate => validate(&settings),
        Command::Resolve { handler } => resolve(&settings, &handler),
        Command::Check {
            handler,
            path,
            permission,
            json,
            denied_handler,
        } => check(&settings, &handler, &path, permission, json, denied_handler),
        Command::Grant {
            permissions,
            lifetime,
        } => {
            let gate = Gate::from_settings(&settings, HandlerRegistry::new());
            let steps = ScenarioSteps::for_gate(&gate);
            if !steps.given_permissions(&permissions, Lifetime::from_counter(lifetime)) {
                return Err(refused(&settings));
            }
            println!("granted {permissions} (lifetime {lifetime})");
            Ok(())
        }
        Command::Reset => {
            let gate = Gate::from_settings(&settings, HandlerRegistry::new());
            let steps = ScenarioSteps::for_gate(&gate);
            if !steps.reset_before_each_scenario() {
                return Err(refused(&settings));
            }
            println!("temporary permissions cleared");
            Ok(())
        }
    }
}

fn permissions(settings: &Settings) -> Result<()> {
    let gate = Gate::from_settings(settings, HandlerRegistry::new());
    for (name, rules) in ScenarioSteps::for_gate(&gate).permission_array() {
        println!("{name}: {}", rules.join(", "));
    }
    Ok(())
}

fn validate(settings: &Settings) -> Result<()> {
    let gate = Gate::from_settings(settings, HandlerRegistry::new());
    let snapshot = gate.rules().snapshot();
    if snapshot.has_errors() {
        for message in snapshot.error_messages() {
            eprintln!("{message}");
        }
        return Err(miette!(
            "{} problem(s) in {}",
            snapshot.errors().len(),
            settings.rules.path.display()
        ));
    }
    println!(
        "{}: {} permission(s) defined",
        settings.rules.path.display(),
        gate.rules().permission_names().len()
    );
    Ok(())
}

fn resolve(settings: &Settings, handler: &str) -> Result<()> {
    let descriptor = RequestDescriptor::from_handler_path(handler)?;
    let gate = Gate::from_settings(settings, HandlerRegistry::new());
    let snapshot = gate.rules().snapshot();
    let document = snapshot
        .document()
        .ok_or_else(|| miette!("{}", snapshot.error_messages().join("\n")))?;

    let resolution = resolver::resolve_document(&descriptor, document);
    for error in &resolution.errors {
        tracing::warn!(error = %error, "Rule problem");
    }
    for permission in resolution.permissions {
        println!("{permission}");
    }
    Ok(())
}

fn check(
    settings: &Settings,
    handler: &str,
    path: &str,
    permission: Option<String>,
    json: bool,
    denied_handler: bool,
) -> Result<()> {
    let mut registry = HandlerRegistry::new();
    if denied_handler {
        let descriptor = RequestDescriptor::from_handler_path(handler)?;
        registry.register_handler(&descriptor.permission_denied_target());
    }
    let gate = Gate::from_settings(settings, registry);

    let actor = permission.as_deref().map(split_list);
    let decision = gate.evaluate(&GateRequest {
        handler,
        path,
        wants_json: json,
        actor: actor.as_ref().map(|a| a as &dyn Actor),
    });

    match decision {
        Decision::Continue => println!("allow"),
        Decision::Redispatch { target } => println!("redispatch {target}"),
        Decision::Redirect { location } => println!("redirect {location}"),
        Decision::Reject(rejection) => {
            println!("reject {} {}", Rejection::STATUS, rejection.body())
        }
    }
    Ok(())
}

fn refused(settings: &Settings) -> miette::Report {
    miette!(
        "temporary permissions refused: app_env `{}` must match testing.appEnv of {} \
         and the document must load without errors",
        settings.app_env,
        settings.rules.path.display()
    )
}
