//! Demo daemon serving a fixed HTML page
//!
//! Usage: world [start|stop]

use anyhow::Result;
use sloop::{AlarmGuard, Buffer, Channel, ServerConfig};
use std::fmt::Write as _;
use std::io::ErrorKind;
use std::net::Ipv4Addr;
use std::process::ExitCode;

/// Requests served per connection
const MAX_REQUESTS: usize = 10;

/// Seconds to wait for a request to arrive
const REQUEST_TIMEOUT_SECS: u32 = 30;

/// Largest single read of a request
const MAX_REQUEST_BYTES: usize = 8192;

fn main() -> ExitCode {
    sloop::run_server(ServerConfig::new(Ipv4Addr::LOCALHOST, 9722, session))
}

fn session(channel: &mut Channel) -> Result<()> {
    let mut request = Buffer::new();
    let mut page = Buffer::new();

    for _ in 0..MAX_REQUESTS {
        if !read_request(channel, &mut request)? {
            break;
        }
        compose_page(&mut page)?;
        send_html(channel, &mut page)?;
    }

    Ok(())
}

/// `false` on disconnect or timeout.
fn read_request(channel: &mut Channel, request: &mut Buffer) -> Result<bool> {
    request.clear();
    let _deadline = AlarmGuard::arm(REQUEST_TIMEOUT_SECS);
    match request.read_from(channel, MAX_REQUEST_BYTES) {
        Ok(n) => Ok(n > 0),
        Err(e) if e.kind() == ErrorKind::Interrupted => Ok(false),
        Err(e) if e.kind() == ErrorKind::ConnectionReset => Ok(false),
        Err(e) => Err(e.into()),
    }
}

fn meta(page: &mut Buffer, key: &str, val: &str) -> std::fmt::Result {
    writeln!(page, "<meta http-equiv=\"{}\" content=\"{}\">", key, val)
}

fn link(page: &mut Buffer, url: &str, label: &str) -> std::fmt::Result {
    writeln!(page, "<a style='margin-right:10px;' href=\"{}\">{}</a>", url, label)
}

fn compose_page(page: &mut Buffer) -> std::fmt::Result {
    writeln!(page, "<!DOCTYPE HTML PUBLIC \"-//W3C//DTD HTML 4.01//EN\">")?;
    writeln!(page, "<html>")?;

    writeln!(page, "<head>")?;
    meta(page, "Content-Type", "text/html; charset=utf-8")?;
    meta(page, "Content-Language", "en-us")?;
    writeln!(page, "<title>{}</title>", "Test")?;
    writeln!(page, "</head>")?;

    writeln!(page, "<body>")?;
    writeln!(page, "<p>")?;
    link(page, "/", "Home")?;
    link(page, "/a/b", "Path")?;
    writeln!(page, "<p>")?;
    writeln!(page, "This is a test.")?;
    writeln!(page, "</body>")?;

    writeln!(page, "</html>")
}

fn send_html(channel: &mut Channel, page: &mut Buffer) -> Result<()> {
    use std::io::Write as _;

    write!(
        channel,
        "HTTP/1.1 200 OK\nContent-Type: text/html\nContent-Length: {}\n\n",
        page.len()
    )?;
    page.flush_to(channel)?;
    Ok(())
}
