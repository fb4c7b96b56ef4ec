use clap::{Arg, Command};
use log::LevelFilter;
use std::process;
use std::sync::Arc;
use traingate::evidence::FileEvidenceStore;
use traingate::relay::SmtpForwarder;
use traingate::{Config, Gateway, MailMessage, Rewriter, RuleSet};

#[tokio::main]
async fn main() {
    let matches = Command::new("traingate")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Transparent SMTP relay that annotates phishing persuasion tactics with training banners")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value("/etc/traingate.yaml"),
        )
        .arg(
            Arg::new("generate-config")
                .long("generate-config")
                .value_name("FILE")
                .help("Generate a default configuration file")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("test-config")
                .long("test-config")
                .help("Validate the configuration and rule table, then exit")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("test-message")
                .long("test-message")
                .value_name("FILE")
                .help("Run the engine against an .eml file and print a JSON report")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Enable verbose logging")
                .action(clap::ArgAction::SetTrue),
        )
        .get_matches();

    let log_level = if matches.get_flag("verbose") {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .init();

    if let Some(path) = matches.get_one::<String>("generate-config") {
        let config = Config::default();
        if let Err(e) = config.to_file(path) {
            eprintln!("Error writing configuration: {e}");
            process::exit(1);
        }
        println!("Default configuration written to {path}");
        return;
    }

    let config_path = matches.get_one::<String>("config").unwrap();
    let config = match Config::load_or_default(config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            process::exit(1);
        }
    };

    let rules = match &config.rules_file {
        Some(path) => match RuleSet::from_file(path) {
            Ok(rules) => rules,
            Err(e) => {
                eprintln!("Error loading rule table from {path}: {e}");
                process::exit(1);
            }
        },
        None => RuleSet::builtin(),
    };

    if matches.get_flag("test-config") {
        println!("Configuration OK");
        println!("  listen:     {}:{}", config.listen_host, config.listen_port);
        println!(
            "  downstream: {}:{}",
            config.downstream_host, config.downstream_port
        );
        println!("  allowed:    {}", config.allowed_domain);
        println!("  tactics:    {}", rules.tactics.len());
        return;
    }

    if let Some(path) = matches.get_one::<String>("test-message") {
        test_message_file(&config, rules, path);
        return;
    }

    let evidence = Arc::new(FileEvidenceStore::new(config.evidence_dir.clone()));
    let forwarder = Arc::new(SmtpForwarder::new(
        config.downstream_host.clone(),
        config.downstream_port,
    ));
    let gateway = Gateway::new(config, rules, evidence, forwarder);
    if let Err(e) = gateway.run().await {
        eprintln!("Gateway failed: {e}");
        process::exit(1);
    }
}

/// Offline engine run against a message file, for rule authoring.
fn test_message_file(config: &Config, rules: RuleSet, path: &str) {
    let raw = match std::fs::read(path) {
        Ok(raw) => raw,
        Err(e) => {
            eprintln!("Error reading {path}: {e}");
            process::exit(1);
        }
    };
    let mut msg = match MailMessage::parse(&raw) {
        Ok(msg) => msg,
        Err(e) => {
            eprintln!("Error parsing {path}: {e}");
            process::exit(1);
        }
    };

    let rewriter = Rewriter::new(Arc::new(rules), config.rewrite_options());
    let outcome = rewriter.process(&mut msg);
    let result = MailMessage::parse(&outcome.bytes).expect("rewritten message re-parses");

    let report = serde_json::json!({
        "already_processed": outcome.already_processed,
        "detections": outcome
            .detections
            .iter()
            .map(|(tactic, score)| serde_json::json!({ "tactic": tactic, "score": score }))
            .collect::<Vec<_>>(),
        "subject": result.subject(),
        "tactics_header": result.header(&config.tactics_header),
        "signals_header": result.header(&config.signals_header),
        "rules_header": result.header(&config.rules_header),
    });
    println!("{}", serde_json::to_string_pretty(&report).unwrap());
}
