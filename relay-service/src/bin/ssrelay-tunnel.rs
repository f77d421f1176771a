// Licensed under the Mozilla Public License (MPL), v. 2.0. See LICENSE.md.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Arg, Command};
use relay_net::{Stats, TunnelConfig};
use relay_protocol::Destination;
use relay_service::{process, Settings};

fn cli() -> Command {
    Command::new("ssrelay-tunnel")
        .about("Shadowsocks-compatible encrypted relay tunnel (local plaintext endpoint)")
        .arg(Arg::new("config").short('c').long("config").value_name("FILE").help("JSON settings file"))
        .arg(Arg::new("remote").short('s').long("remote").value_name("ADDR").help("encrypted remote server address"))
        .arg(Arg::new("local").short('l').long("local").value_name("ADDR").help("local plaintext listen address"))
        .arg(Arg::new("fixed_dest").short('d').long("dest").value_name("HOST").help("destination host/ip synthesized into the header"))
        .arg(Arg::new("fixed_port").short('p').long("dest-port").value_name("PORT"))
        .arg(Arg::new("password").short('k').long("password").value_name("PASSWORD"))
        .arg(Arg::new("cipher").short('m').long("cipher").value_name("NAME"))
        .arg(Arg::new("auth").short('a').long("auth").num_args(0).help("send one-time auth"))
        .arg(Arg::new("idle_timeout").long("idle-timeout").value_name("SECONDS"))
        .arg(Arg::new("verbose").short('v').long("verbose").num_args(0))
}

fn apply_overrides(settings: &mut Settings, matches: &clap::ArgMatches) -> anyhow::Result<()> {
    if let Some(v) = matches.get_one::<String>("remote") {
        settings.server_addr = v.parse()?;
    }
    if let Some(v) = matches.get_one::<String>("local") {
        settings.local_addr = v.parse()?;
    }
    if let Some(v) = matches.get_one::<String>("fixed_dest") {
        settings.fixed_dest = v.clone();
    }
    if let Some(v) = matches.get_one::<String>("fixed_port") {
        settings.fixed_port = v.parse()?;
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

/// The fixed destination is a plain host/IP from configuration, not a
/// length-prefixed wire header, so it needs its own literal-vs-domain
/// classification here rather than in `relay-protocol`, since parsing a
/// config string isn't a wire concern.
fn parse_fixed_dest(host: &str) -> Destination {
    match host.parse::<IpAddr>() {
        Ok(IpAddr::V4(v4)) => Destination::V4(v4.octets()),
        Ok(IpAddr::V6(v6)) => Destination::V6(v6.octets()),
        Err(_) => Destination::Domain(host.to_string()),
    }
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

    if settings.fixed_dest.is_empty() {
        anyhow::bail!("a fixed destination (--dest / fixed_dest) is required for tunnel mode");
    }

    let profile = relay_crypto::CipherProfile::new(&settings.cipher, &settings.password);
    let remote_addr: SocketAddr = settings.server_addr;
    let config = Arc::new(TunnelConfig {
        profile,
        remote_addr,
        fixed_dest: parse_fixed_dest(&settings.fixed_dest),
        fixed_port: settings.fixed_port,
        auth: settings.one_time_auth,
        idle_timeout: settings.idle_timeout(),
    });
    let stats = Arc::new(Stats::default());
    let shutdown = Arc::new(tokio::sync::Notify::new());

    tokio::spawn(relay_service::wait_for_shutdown_signal(shutdown.clone()));

    relay_net::run_tunnel(settings.local_addr, config, stats, shutdown).await?;
    Ok(())
}
