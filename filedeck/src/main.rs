use std::path::PathBuf;

use clap::{Arg, ArgAction, ArgMatches, Command, arg, command, crate_name, value_parser};
use cli::upload::UploadParams;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

mod cli;

const DEFAULT_URI: &str = "http://localhost:5000";

fn uri_arg() -> Arg {
    arg!(-u --uri <URI>)
        .required(false)
        .default_value(DEFAULT_URI)
        .help("Filedeck server URI")
}

fn history_arg() -> Arg {
    arg!(--history <FILE>)
        .required(false)
        .value_parser(value_parser!(PathBuf))
        .default_value(cli::DEFAULT_HISTORY_FILE)
        .help("Upload history file")
}

fn key_arg() -> Arg {
    arg!(<KEY>).required(true).help("Object key, folder and file name")
}

fn build_cli() -> Command {
    command!(crate_name!())
        .version(clap::crate_version!())
        .about(clap::crate_description!())
        .subcommand(Command::new(cli::VERSION_SUBCOMMAND).about(cli::VERSION_DESCRIPTION))
        .subcommand(Command::new(cli::BUGREPORT_SUBCOMMAND).about(cli::BUGREPORT_DESCRIPTION))
        .subcommand(Command::new(cli::SERVER_SUBCOMMAND).about(cli::SERVER_DESCRIPTION))
        .subcommand(
            Command::new(cli::UPLOAD_SUBCOMMAND)
                .about(cli::UPLOAD_DESCRIPTION)
                .arg(uri_arg())
                .arg(history_arg())
                .arg(
                    arg!(<FILES>)
                        .required(true)
                        .num_args(1..)
                        .action(ArgAction::Append)
                        .value_parser(value_parser!(PathBuf))
                        .help("Files to upload"),
                )
                .arg(
                    arg!(-f --folder <FOLDER>)
                        .required(false)
                        .default_value("")
                        .help("Target folder inside the bucket"),
                )
                .arg(
                    arg!(-c --"chunk-size" <MB>)
                        .required(false)
                        .value_parser(value_parser!(u64))
                        .help("Size of one range of a resumable upload in MiB"),
                )
                .arg(
                    arg!(-j --concurrency <COUNT>)
                        .required(false)
                        .value_parser(value_parser!(usize))
                        .help("Files uploaded at the same time"),
                )
                .arg(
                    arg!(-t --timeout <SECONDS>)
                        .required(false)
                        .value_parser(value_parser!(u64))
                        .help("Fail a request the server has not answered within this many seconds"),
                ),
        )
        .subcommand(
            Command::new(cli::LIST_SUBCOMMAND)
                .about(cli::LIST_DESCRIPTION)
                .arg(uri_arg())
                .subcommand_required(true)
                .subcommand(Command::new(cli::FOLDERS_SUBCOMMAND).about(cli::FOLDERS_DESCRIPTION))
                .subcommand(
                    Command::new(cli::FILES_SUBCOMMAND)
                        .about(cli::FILES_DESCRIPTION)
                        .arg(arg!(-p --prefix <PREFIX>).required(false).default_value("").help("Key prefix")),
                ),
        )
        .subcommand(
            Command::new(cli::DELETE_SUBCOMMAND)
                .about(cli::DELETE_DESCRIPTION)
                .arg(uri_arg())
                .arg(key_arg()),
        )
        .subcommand(
            Command::new(cli::LINK_SUBCOMMAND)
                .about(cli::LINK_DESCRIPTION)
                .arg(uri_arg())
                .arg(key_arg()),
        )
        .subcommand(
            Command::new(cli::CONFIG_SUBCOMMAND)
                .about(cli::CONFIG_DESCRIPTION)
                .arg(uri_arg()),
        )
        .subcommand(
            Command::new(cli::HISTORY_SUBCOMMAND)
                .about(cli::HISTORY_DESCRIPTION)
                .arg(history_arg())
                .subcommand(Command::new(cli::UNFINISHED_SUBCOMMAND).about(cli::UNFINISHED_DESCRIPTION))
                .subcommand(Command::new(cli::CLEAR_SUBCOMMAND).about(cli::CLEAR_DESCRIPTION))
                .subcommand(Command::new(cli::DISCARD_SUBCOMMAND).about(cli::DISCARD_DESCRIPTION)),
        )
        .arg_required_else_help(true)
        .disable_version_flag(true)
}

/// Server sets up its own subscriber, everything else logs warnings only by default.
fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "filedeck=warn,client=warn".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn string<'a>(matches: &'a ArgMatches, id: &str) -> &'a str {
    matches.get_one::<String>(id).map_or("", String::as_str)
}

fn history_path(matches: &ArgMatches) -> PathBuf {
    matches
        .get_one::<PathBuf>("history")
        .cloned()
        .unwrap_or_else(|| PathBuf::from(cli::DEFAULT_HISTORY_FILE))
}

#[tokio::main]
async fn main() {
    let cli = build_cli().get_matches();

    match cli.subcommand() {
        Some((cli::SERVER_SUBCOMMAND, _)) => cli::server::run().await,
        Some((cli::VERSION_SUBCOMMAND, _)) => cli::version::run(),
        Some((cli::BUGREPORT_SUBCOMMAND, _)) => cli::bugreport::run(),
        Some((cli::UPLOAD_SUBCOMMAND, m)) => {
            init_tracing();
            let params = UploadParams {
                uri: string(m, "uri").to_owned(),
                files: m
                    .get_many::<PathBuf>("FILES")
                    .map(|files| files.cloned().collect())
                    .unwrap_or_default(),
                folder: string(m, "folder").to_owned(),
                chunk_size: m.get_one::<u64>("chunk-size").copied(),
                concurrency: m.get_one::<usize>("concurrency").copied(),
                timeout: m.get_one::<u64>("timeout").copied(),
                history: history_path(m),
            };
            cli::upload::run(params).await;
        }
        Some((cli::LIST_SUBCOMMAND, m)) => {
            init_tracing();
            let uri = string(m, "uri");
            match m.subcommand() {
                Some((cli::FOLDERS_SUBCOMMAND, _)) => cli::files::list_folders(uri).await,
                Some((cli::FILES_SUBCOMMAND, f)) => cli::files::list_files(uri, string(f, "prefix")).await,
                _ => {}
            }
        }
        Some((cli::DELETE_SUBCOMMAND, m)) => {
            init_tracing();
            cli::files::delete(string(m, "uri"), string(m, "KEY")).await;
        }
        Some((cli::LINK_SUBCOMMAND, m)) => {
            init_tracing();
            cli::files::link(string(m, "uri"), string(m, "KEY")).await;
        }
        Some((cli::CONFIG_SUBCOMMAND, m)) => {
            init_tracing();
            cli::files::config(string(m, "uri")).await;
        }
        Some((cli::HISTORY_SUBCOMMAND, m)) => {
            let path = history_path(m);
            match m.subcommand() {
                Some((cli::UNFINISHED_SUBCOMMAND, _)) => cli::history::unfinished(&path),
                Some((cli::CLEAR_SUBCOMMAND, _)) => cli::history::clear(&path),
                Some((cli::DISCARD_SUBCOMMAND, _)) => cli::history::discard(&path),
                _ => cli::history::list(&path),
            }
        }
        _ => {}
    }
}
