//! netsentry CLI - network reachability and stability monitor.

use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use colored::Colorize;
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;

use netsentry::cli::*;
use netsentry::config::{init_logging, Config};
use netsentry::error::Result;
use netsentry::probe::{DnsMultiplexer, DnsStrategy, LookupCommand};
use netsentry::util::{self, InterfaceProvider, SystemInterfaces};
use netsentry::{NetworkMonitor, NetworkState, Quality, StateChange, VERSION};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }

    let mut config = if let Some(ref path) = cli.config {
        Config::load(path)?
    } else {
        Config::load_or_default(Config::default_path())?
    };

    // Config file logging settings, with command-line flags on top
    cli.apply_logging_overrides(&mut config.logging);
    init_logging(&config.logging)?;

    // Dispatch command
    match cli.command {
        Commands::Watch(args) => run_watch(args, config, cli.format).await,
        Commands::Check(args) => run_check(args, config, cli.format).await,
        Commands::Interfaces(args) => run_interfaces(&args, cli.format),
        Commands::Resolve(args) => run_resolve(args, &config, cli.format).await,
        Commands::Completions(args) => run_completions(args),
        Commands::Config(args) => run_config(args),
    }
}

/// Run the monitor until Ctrl-C
async fn run_watch(args: WatchArgs, mut config: Config, format: OutputFormat) -> Result<()> {
    if let Some(consensus) = args.consensus {
        config.monitor.reconciler.consensus_threshold = consensus;
        config.validate()?;
    }

    if format == OutputFormat::Text {
        println!(
            "{} netsentry {} watching connectivity (Ctrl-C to stop)",
            "→".cyan(),
            VERSION
        );
        println!();
    }

    let monitor = Arc::new(NetworkMonitor::new(config.monitor));
    let mut changes = monitor.subscribe();
    monitor.start()?;

    if args.initial {
        print_state(&monitor.state(), format, false)?;
    }

    loop {
        tokio::select! {
            _ = signal::ctrl_c() => break,
            received = changes.recv() => match received {
                Ok(change) => print_change(&change, format)?,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Missed {} state changes", skipped);
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    monitor.stop();
    monitor.join().await;

    if format == OutputFormat::Text {
        println!();
        println!("{} Stopped.", "✓".green());
    }
    Ok(())
}

/// One forced comprehensive check
async fn run_check(args: CheckArgs, mut config: Config, format: OutputFormat) -> Result<()> {
    // A one-shot check has no history to debounce against
    config.monitor.reconciler.startup_grace = Duration::ZERO;
    config.monitor.vpn.startup_grace = Duration::ZERO;

    let monitor = NetworkMonitor::new(config.monitor);
    let started = Instant::now();
    let state = monitor.force_check().await;
    let elapsed = started.elapsed();

    print_state(&state, format, args.detailed)?;
    if format == OutputFormat::Text {
        println!();
        println!("Checked in {}", util::format_duration(elapsed).dimmed());
    }
    Ok(())
}

/// Show network interfaces
fn run_interfaces(args: &InterfacesArgs, format: OutputFormat) -> Result<()> {
    let interfaces: Vec<_> = SystemInterfaces
        .snapshot()
        .into_iter()
        .filter(|i| args.all || i.has_external_ipv4() || i.has_ipv6())
        .collect();

    if format == OutputFormat::Json {
        println!("{}", to_json(&interfaces)?);
        return Ok(());
    }

    let primary = util::primary_interface(&interfaces).map(|i| i.name.clone());

    println!("{}", "Network Interfaces:".bright_white().bold());
    println!();
    for iface in &interfaces {
        let mut markers = Vec::new();
        if primary.as_deref() == Some(iface.name.as_str()) {
            markers.push("primary".green().to_string());
        }
        if util::is_vpn_interface(&iface.name) {
            markers.push("vpn".magenta().to_string());
        }
        if iface.has_external_ipv4() {
            markers.push("routable".cyan().to_string());
        }

        println!(
            "  {} {} ({}) {}",
            "→".cyan(),
            iface.name.bright_white(),
            iface.interface_type,
            markers.join(" ")
        );
        for addr in &iface.addresses {
            let line = addr.address.to_string();
            if addr.internal {
                println!("      {}", line.dimmed());
            } else {
                println!("      {}", line);
            }
        }
    }

    if interfaces.is_empty() {
        println!("  {} No interfaces found", "⚠".yellow());
    }
    Ok(())
}

/// Resolve a hostname through the strategy chain
async fn run_resolve(args: ResolveArgs, config: &Config, format: OutputFormat) -> Result<()> {
    let timeout = config.monitor.probe.dns_timeout;
    let dns = if args.command_only {
        let command: Arc<dyn DnsStrategy> = Arc::new(LookupCommand::new(timeout));
        DnsMultiplexer::with_strategies(vec![command], timeout)
    } else {
        DnsMultiplexer::for_current_platform(timeout)
    };

    let started = Instant::now();
    let outcome = dns.resolve(&args.host).await;
    let elapsed = started.elapsed();

    match outcome {
        Ok((addrs, strategy)) => {
            if format == OutputFormat::Json {
                let value = serde_json::json!({
                    "host": args.host,
                    "strategy": strategy,
                    "addresses": addrs,
                    "latency_ms": elapsed.as_millis() as u64,
                });
                println!("{}", to_json(&value)?);
            } else {
                println!(
                    "{} {} via {} in {}",
                    "✓".green(),
                    args.host.bright_white(),
                    strategy.cyan(),
                    util::format_duration(elapsed)
                );
                for addr in addrs {
                    println!("  {} {}", "→".cyan(), addr);
                }
            }
            Ok(())
        }
        Err(e) => {
            if format == OutputFormat::Text {
                println!(
                    "{} {} ({})",
                    "✗".red(),
                    e,
                    dns.strategy_names().join(" → ")
                );
            }
            Err(e.into())
        }
    }
}

/// Generate shell completions
fn run_completions(args: CompletionsArgs) -> Result<()> {
    use clap::CommandFactory;
    use clap_complete::generate;

    let mut cmd = Cli::command();
    let name = cmd.get_name().to_string();

    let shell = match args.shell {
        Shell::Bash => clap_complete::Shell::Bash,
        Shell::Zsh => clap_complete::Shell::Zsh,
        Shell::Fish => clap_complete::Shell::Fish,
        Shell::PowerShell => clap_complete::Shell::PowerShell,
    };

    generate(shell, &mut cmd, name, &mut std::io::stdout());

    Ok(())
}

/// Show example configuration
fn run_config(args: ConfigArgs) -> Result<()> {
    let config = Config::example();

    if let Some(ref path) = args.output {
        config.save(path)?;
        println!(
            "{} Configuration written to {}",
            "✓".green(),
            path.display()
        );
    } else {
        println!("{}", config.to_toml()?);
    }

    Ok(())
}

fn to_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<String> {
    Ok(serde_json::to_string_pretty(value).map_err(anyhow::Error::from)?)
}

fn print_change(change: &StateChange, format: OutputFormat) -> Result<()> {
    if format == OutputFormat::Json {
        println!(
            "{}",
            serde_json::to_string(change).map_err(anyhow::Error::from)?
        );
        return Ok(());
    }

    let old = &change.old_state;
    let new = &change.new_state;
    let mut parts = Vec::new();

    if old.is_online != new.is_online {
        parts.push(if new.is_online {
            "online".green().bold().to_string()
        } else {
            "offline".red().bold().to_string()
        });
    }
    if old.quality != new.quality {
        parts.push(format!("quality {} → {}", old.quality, quality_label(new.quality)));
    }
    if old.vpn_active != new.vpn_active {
        parts.push(format!("vpn {}", if new.vpn_active { "up" } else { "down" }));
    }
    if old.primary_interface != new.primary_interface {
        parts.push(format!(
            "primary {}",
            new.primary_interface.as_deref().unwrap_or("none")
        ));
    }
    if parts.is_empty() {
        parts.push("interfaces changed".dimmed().to_string());
    }

    println!("{} v{} {}", "→".cyan(), change.version, parts.join(", "));
    Ok(())
}

fn print_state(state: &NetworkState, format: OutputFormat, detailed: bool) -> Result<()> {
    if format == OutputFormat::Json {
        println!("{}", to_json(state)?);
        return Ok(());
    }

    let status = if state.is_online {
        "ONLINE".green().bold()
    } else {
        "OFFLINE".red().bold()
    };
    println!("{} {}", "Status:".bright_white().bold(), status);
    println!("  Quality:    {}", quality_label(state.quality));
    println!("  Connection: {}", state.connection_type);
    println!(
        "  Primary:    {}",
        state.primary_interface.as_deref().unwrap_or("none")
    );
    println!(
        "  VPN:        {}",
        if state.vpn_active { "active".magenta() } else { "inactive".normal() }
    );
    if let Some(latency) = state.diagnostics.latency_ms {
        println!("  Latency:    {} ms", latency);
    }

    if detailed {
        let mark = |ok: bool| if ok { "✓".green() } else { "✗".red() };
        println!();
        println!("{}", "Signals:".bright_white().bold());
        println!("  {} DNS resolution", mark(state.diagnostics.dns_resolvable));
        println!("  {} Endpoint reachability", mark(state.diagnostics.internet_reachable));
        println!("  {} No captive portal", mark(!state.diagnostics.captive_portal));
        println!();
        println!("{}", "Interfaces:".bright_white().bold());
        for iface in &state.interfaces {
            let addrs: Vec<String> = iface.external_ipv4().map(|a| a.to_string()).collect();
            println!(
                "  {} {} ({}) {}",
                "→".cyan(),
                iface.name,
                iface.interface_type,
                addrs.join(", ")
            );
        }
        println!();
        println!("  State version {}", state.version);
    }

    Ok(())
}

fn quality_label(quality: Quality) -> colored::ColoredString {
    let label = quality.to_string();
    match quality {
        Quality::Excellent | Quality::Good => label.green(),
        Quality::Fair => label.yellow(),
        Quality::Poor | Quality::Offline => label.red(),
    }
}
