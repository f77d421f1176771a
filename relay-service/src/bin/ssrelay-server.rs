// Licensed under the Mozilla Public License (MPL), v. 2.0. See LICENSE.md.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Arg, Command};
use relay_net::{MemoryAcl, ServerConfig, Stats, SystemResolver};
use relay_service::{process, Settings};

fn cli() -> Command {
    Command::new("ssrelay-server")
        .about("Shadowsocks-compatible encrypted relay server")
        .arg(Arg::new("config").short('c').long("config").value_name("FILE").help("JSON settings file"))
        .arg(Arg::new("listen").short('s').long("listen").value_name("ADDR").help("encrypted listen address"))
        .arg(Arg::new("password").short('k').long("password").value_name("PASSWORD"))
        .arg(Arg::new("cipher").short('m').long("cipher").value_name("NAME"))
        .arg(Arg::new("auth").short('a').long("auth").num_args(0).help("require one-time auth"))
        .arg(Arg::new("idle_timeout").long("idle-timeout").value_name("SECONDS"))
        .arg(Arg::new("verbose").short('v').long("verbose").num_args(0))
}

fn apply_overrides(settings: &mut Settings, matches: &clap::ArgMatches) -> anyhow::Result<()> {
    if let Some(v) = matches.get_one::<String>("listen") {
        settings.server_addr = v.parse()?;
    }
    if let Some(v) = matches.get_one::<String>("password") {
        settings.password = v.clone();
    }
    if let Some(v) = matches.get_one::<String>("cipher") {
        settings.cipher = v.clone();
    }
    if matches.get_flag("auth") {
        settings.one_time_auth = true;
    }
    if let Some(v) = matches.get_one::<String>("idle_timeout") {
        settings.idle_timeout_secs = v.parse()?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let matches = cli().get_matches();
    let config_path = matches.get_one::<String>("config").map(PathBuf::from);
    let mut settings = Settings::load(config_path.as_deref())?;
    apply_overrides(&mut settings, &matches)?;

    process::init_tracing(matches.get_flag("verbose"));
    process::raise_nofile_limit(settings.nofile_limit);
    settings.warn_on_noop_fields();

    let profile = relay_crypto::CipherProfile::new(&settings.cipher, &settings.password);
    let config = Arc::new(ServerConfig {
        profile,
        auth: settings.one_time_auth,
        idle_timeout: settings.idle_timeout(),
    });
    let resolver = Arc::new(SystemResolver);
    let acl = Arc::new(MemoryAcl::new(settings.acl_mode()));
    let stats = Arc::new(Stats::default());
    let shutdown = Arc::new(tokio::sync::Notify::new());

    tokio::spawn(relay_service::wait_for_shutdown_signal(shutdown.clone()));

    relay_net::run_server(settings.server_addr, config, resolver, acl, stats, shutdown).await?;
    Ok(())
}
