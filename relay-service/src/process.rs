// Licensed under the Mozilla Public License (MPL), v. 2.0. See LICENSE.md.

/// Installs a `tracing_subscriber::fmt` subscriber as the process-wide
/// diagnostics sink.
pub fn init_tracing(verbose: bool) {
    let filter = if verbose {
        tracing_subscriber::EnvFilter::new("debug")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Raises `RLIMIT_NOFILE` to at least `target`, logging the outcome. A
/// long-running relay is one task per connection plus one socket per task;
/// the default per-process descriptor limit on most distributions is too
/// low for more than a few hundred concurrent connections.
#[cfg(unix)]
pub fn raise_nofile_limit(target: u64) {
    if target == 0 {
        return;
    }
    unsafe {
        let mut lim = libc::rlimit { rlim_cur: 0, rlim_max: 0 };
        if libc::getrlimit(libc::RLIMIT_NOFILE, &mut lim) != 0 {
            tracing::warn!("getrlimit(RLIMIT_NOFILE) failed, leaving the inherited limit in place");
            return;
        }
        let ceiling = if lim.rlim_max == libc::RLIM_INFINITY { target } else { lim.rlim_max.min(target) };
        if lim.rlim_cur >= ceiling {
            return;
        }
        lim.rlim_cur = ceiling;
        if libc::setrlimit(libc::RLIMIT_NOFILE, &lim) != 0 {
            tracing::warn!(target, "setrlimit(RLIMIT_NOFILE) failed, leaving the inherited limit in place");
        } else {
            tracing::info!(limit = lim.rlim_cur, "raised RLIMIT_NOFILE");
        }
    }
}

#[cfg(not(unix))]
pub fn raise_nofile_limit(_target: u64) {}
