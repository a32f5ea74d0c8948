//! Zentinel Sign Agent CLI entry point.
//!
//! Runs one raw HTTP request through the sign pipeline and prints the result.

use anyhow::{Context, Result};
use clap::Parser;
use std::io::{Read, Write};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use zentinel_agent_sign::message::ParsedRequest;
use zentinel_agent_sign::{HttpService, RuleTestRequest, SignPipeline, SignerConfig, ToolFlag};

#[derive(Parser, Debug)]
#[command(name = "zentinel-agent-sign")]
#[command(author, version, about = "Request signing agent for Zentinel")]
struct Args {
    /// Configuration file path (YAML or JSON)
    #[arg(short, long, env = "SIGN_CONFIG")]
    config: Option<PathBuf>,

    /// Raw request file, or "-" for stdin
    #[arg(short, long)]
    request: Option<PathBuf>,

    /// Originating tools, comma separated (e.g. "TOOL_PROXY,TOOL_REPEATER")
    #[arg(long, default_value = "TOOL_PROXY")]
    tool: String,

    /// Target host (defaults to the Host header)
    #[arg(long)]
    host: Option<String>,

    /// Target port
    #[arg(long)]
    port: Option<u16>,

    /// Target protocol (http or https)
    #[arg(long)]
    protocol: Option<String>,

    /// Run this rule directly instead of matching (rule test mode)
    #[arg(long)]
    rule_id: Option<i64>,

    /// Output logs as JSON
    #[arg(long)]
    json_logs: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Print example configuration and exit.
    #[arg(long)]
    example_config: bool,

    /// Validate configuration and exit.
    #[arg(long)]
    validate: bool,
}

fn print_example_config() {
    let example = r#"# Sign Agent Configuration Example
version: "1"

settings:
  # Used when the host does not supply the target service
  default_protocol: "https"
  default_port: 443
  script:
    # Sandbox limits per evaluation
    max_operations: 1000000
    max_call_levels: 64
    max_expr_depth: 64
    max_string_size: 10485760  # 10MB
    # Connect and read timeout for http:: calls
    http_timeout_secs: 12

rules:
  # Timestamp + MD5 signature over sorted query parameters
  - name: "api-md5-sign"
    filter: "^https://api\\.example\\.com/"
    tool_flag: "TOOL_PROXY,TOOL_REPEATER"
    kind: script
    content: |
      fn main() {
        let ts = `${utils::timestamp(TimestampUnit::SECONDS)}`;
        let params = utils::get_parameters_by_location(
          request::parameters, ParameterLocation::PARAM_URL);
        let plain = "";
        for p in utils::sort_parameters(params, SortOrder::ASC) {
          if p.name != "sign" && p.name != "ts" { plain += p.name + "=" + p.value + "&"; }
        }
        plain += "ts=" + ts + "&key=secret";
        log("signing " + plain);
        [
          #{ name: "ts", value: ts,
             location: ParameterLocation::PARAM_URL, action: EditAction::OVERRIDE },
          #{ name: "sign", value: utils::md5(plain),
             location: ParameterLocation::PARAM_URL, action: EditAction::OVERRIDE }
        ]
      }

  # Static header, no script needed
  - name: "client-header"
    filter: "internal\\.example\\.com"
    tool_flag: "TOOL_PROXY"
    kind: declarative
    content: |
      [{"name": "X-Client-Time", "value": "${timestamp_ms}",
        "location": "HEADER", "action": "OVERRIDE"}]
"#;
    println!("{}", example);
}

fn read_request(path: &PathBuf) -> Result<Vec<u8>> {
    let mut raw = Vec::new();
    if path.as_os_str() == "-" {
        std::io::stdin()
            .read_to_end(&mut raw)
            .context("Failed to read request from stdin")?;
    } else {
        raw = std::fs::read(path)
            .with_context(|| format!("Failed to read request file: {}", path.display()))?;
    }
    Ok(raw)
}

/// Host taken from the request's Host header, without any port.
fn host_header(raw: &[u8]) -> Option<String> {
    let parsed = ParsedRequest::parse(raw).ok()?;
    let host = parsed.header("Host")?.trim();
    let host = host.rsplit_once(':').map_or(host, |(name, _)| name);
    Some(host.to_string())
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    // Logs go to stderr so the rewritten request owns stdout
    if args.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }

    // Print example config if requested
    if args.example_config {
        print_example_config();
        return Ok(());
    }

    // Load configuration
    let config = match &args.config {
        Some(path) => SignerConfig::from_file(path)
            .with_context(|| format!("Failed to load config: {}", path.display()))?,
        None => SignerConfig::default(),
    };

    // Validate only if requested
    if args.validate {
        config.validate().context("Invalid configuration")?;
        info!(rules = config.rules.len(), "Configuration is valid");
        return Ok(());
    }

    let (pipeline, _store) =
        SignPipeline::from_config(config).context("Failed to initialize sign pipeline")?;

    let request_path = args
        .request
        .as_ref()
        .context("--request is required unless --example-config or --validate is given")?;
    let raw = read_request(request_path)?;

    let output = if let Some(rule_id) = args.rule_id {
        let test = RuleTestRequest {
            rule_id,
            raw_request: String::from_utf8_lossy(&raw).into_owned(),
            host: args.host.clone().or_else(|| host_header(&raw)).unwrap_or_default(),
            port: i64::from(args.port.unwrap_or(pipeline.settings().default_port)),
            protocol: args
                .protocol
                .clone()
                .unwrap_or_else(|| pipeline.settings().default_protocol.clone()),
        };
        pipeline.test_rule(&test).context("Rule test failed")?.into_bytes()
    } else {
        let tool_flag = ToolFlag::parse(&args.tool);
        let service = args.host.as_ref().map(|host| {
            HttpService::new(
                host.clone(),
                args.port.unwrap_or(pipeline.settings().default_port),
                args.protocol
                    .clone()
                    .unwrap_or_else(|| pipeline.settings().default_protocol.clone()),
            )
        });

        match pipeline.process_request(tool_flag, &raw, service.as_ref()) {
            Some(signed) => signed,
            None => {
                info!("Request left unchanged");
                raw
            }
        }
    };

    let mut stdout = std::io::stdout().lock();
    stdout.write_all(&output).context("Failed to write request")?;
    stdout.flush()?;

    let metrics = pipeline.metrics();
    info!(
        requests_total = metrics.requests_total,
        requests_signed = metrics.requests_signed,
        sign_errors = metrics.sign_errors,
        ambiguous_matches = metrics.ambiguous_matches,
        "Done"
    );

    Ok(())
}
