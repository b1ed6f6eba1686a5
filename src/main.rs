use clap::{Arg, ArgAction, ArgMatches, Command};
use std::error::Error;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

use objsync::config::Config;
use objsync::logging::*;
use objsync::store::MemoryRepository;
use objsync::sync::FetchRequest;
use objsync::types::{Object, ObjectHash};

///////////////////////
// Utility functions //
///////////////////////

fn load_config(matches: &ArgMatches) -> Result<Config, Box<dyn Error>> {
	let mut config = match matches.get_one::<String>("config") {
		Some(path) => Config::load(&PathBuf::from(path))?,
		None => Config::default(),
	};
	config.apply_env()?;
	if let Some(dir) = matches.get_one::<String>("repos") {
		config.repos_dir = PathBuf::from(dir);
	}
	config.validate()?;
	Ok(config)
}

fn parse_hash(value: Option<&String>, what: &str) -> Result<Option<ObjectHash>, Box<dyn Error>> {
	match value {
		Some(v) => Ok(Some(v.parse::<ObjectHash>().map_err(|e| format!("{}: {}", what, e))?)),
		None => Ok(None),
	}
}

/// Cancel `token` on Ctrl-C
fn cancel_on_ctrl_c(token: &CancellationToken) {
	let token = token.clone();
	tokio::spawn(async move {
		if tokio::signal::ctrl_c().await.is_ok() {
			info!("Interrupted, shutting down");
			token.cancel();
		}
	});
}

fn dump(config: &Config, repo: &str) -> Result<(), Box<dyn Error>> {
	let store = MemoryRepository::load(&config.repo_path(repo))?;
	for object in store.objects() {
		match object {
			Object::Commit(c) => {
				let parents: Vec<String> = c.parents.iter().map(|p| p.short()).collect();
				println!("commit {} parents=[{}] {}", c.hash, parents.join(","), c.message);
			}
			Object::Tag(t) => println!("tag    {} {} -> {} {}", t.hash, t.name, t.target_kind, t.target),
			Object::Blob(b) => println!("{} {} {} bytes", b.kind, b.hash, b.data.len()),
		}
	}
	eprintln!("{} object(s)", store.len());
	Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
	let matches = Command::new("objsync")
		.version("0.1.0")
		.author("Szilard Hajba <szilu@symbion.hu>")
		.about("Peer-to-peer git object replication")
		.subcommand_required(true)
		.arg(
			Arg::new("config")
				.short('c')
				.long("config")
				.value_name("FILE")
				.global(true)
				.help("Config file (.toml, .json or .json5)"),
		)
		.arg(
			Arg::new("repos")
				.short('r')
				.long("repos")
				.value_name("DIR")
				.global(true)
				.help("Repositories directory"),
		)
		.subcommand(Command::new("serve").about("Serve objects to peers"))
		.subcommand(
			Command::new("fetch")
				.about("Fetch a commit and its missing ancestors from the seed peers")
				.arg(Arg::new("repo").required(true))
				.arg(Arg::new("start").required(true).help("Commit or tag hash"))
				.arg(Arg::new("end").long("end").value_name("HASH").help("Local boundary"))
				.arg(
					Arg::new("exclude-end")
						.long("exclude-end")
						.action(ArgAction::SetTrue)
						.help("Leave the end object out of the fetched set"),
				)
				.arg(
					Arg::new("tag")
						.long("tag")
						.action(ArgAction::SetTrue)
						.help("Start and end may name tags"),
				),
		)
		.subcommand(
			Command::new("dump")
				.about("Dump the objects of a local repository")
				.arg(Arg::new("repo").required(true)),
		)
		.get_matches();

	let config = load_config(&matches)?;
	init_tracing(&config.log_level);

	if matches.subcommand_matches("serve").is_some() {
		let shutdown = CancellationToken::new();
		cancel_on_ctrl_c(&shutdown);
		objsync::serve::serve(&config, shutdown).await?;
	} else if let Some(sub) = matches.subcommand_matches("fetch") {
		let repo = sub.get_one::<String>("repo").ok_or("fetch: repository argument required")?;
		let start = parse_hash(sub.get_one::<String>("start"), "start")?
			.ok_or("fetch: start hash required")?;
		let request = FetchRequest {
			repo: repo.clone(),
			start,
			end: parse_hash(sub.get_one::<String>("end"), "end")?,
			exclude_end: sub.get_flag("exclude-end"),
			tagged: sub.get_flag("tag"),
		};
		let cancel = CancellationToken::new();
		cancel_on_ctrl_c(&cancel);
		let summary = objsync::sync::fetch(&config, &request, &cancel).await?;
		println!("{} packfile(s), {} object(s)", summary.packfiles, summary.objects);
	} else if let Some(sub) = matches.subcommand_matches("dump") {
		let repo = sub.get_one::<String>("repo").ok_or("dump: repository argument required")?;
		dump(&config, repo)?;
	}

	Ok(())
}

// vim: ts=4
