//! Ad-hoc authenticated requests

use anyhow::{Context, Result};
use clap::Args;
use colored::*;
use log::debug;

use powerplatform_cli::api::{ApiRequest, CallContext};
use powerplatform_cli::ClientManager;

#[derive(Args)]
pub struct RawArgs {
    /// HTTP method
    pub method: String,

    /// Absolute URL on a known Power Platform host
    pub url: String,

    /// JSON body, or @path to read it from a file
    #[arg(long)]
    pub body: Option<String>,

    /// Accepted status code, repeatable (defaults to any 2xx)
    #[arg(long = "expect")]
    pub expect: Vec<u16>,

    /// Extra header as NAME:VALUE, repeatable
    #[arg(long = "header")]
    pub headers: Vec<String>,

    /// Print the status line and response headers
    #[arg(short, long)]
    pub include: bool,
}

pub async fn raw_command(args: RawArgs, manager: &ClientManager, ctx: &CallContext) -> Result<()> {
    let method = reqwest::Method::from_bytes(args.method.to_ascii_uppercase().as_bytes())
        .with_context(|| format!("Invalid HTTP method '{}'", args.method))?;

    let mut request = ApiRequest::new(method, args.url).expect(&args.expect);
    for header in &args.headers {
        let (name, value) = header
            .split_once(':')
            .with_context(|| format!("Header '{}' must look like NAME:VALUE", header))?;
        request = request.header(name.trim(), value.trim());
    }
    if let Some(body) = args.body {
        let body = match body.strip_prefix('@') {
            Some(path) => std::fs::read_to_string(path).with_context(|| format!("Failed to read body file {}", path))?,
            None => body,
        };
        let value: serde_json::Value = serde_json::from_str(&body).context("Body is not valid JSON")?;
        request = request.json(&value)?;
    }

    debug!("Sending {} {}", request.method, request.url);
    let response = manager.api().execute(ctx, &request).await?;

    if args.include {
        println!("{}", format!("HTTP {}", response.status).bright_blue().bold());
        for (name, value) in &response.headers {
            println!("{}: {}", name.as_str().dimmed(), value.to_str().unwrap_or("<binary>"));
        }
        println!();
    }

    match response.json::<serde_json::Value>() {
        Ok(Some(value)) => println!("{}", serde_json::to_string_pretty(&value)?),
        Ok(None) => {}
        Err(_) => println!("{}", response.text()),
    }
    Ok(())
}
