use anyhow::{Context, Result};
use std::path::PathBuf;

use shohin::db::{Database, NewTree, TreeStatus};
use shohin::photos;
use shohin::{archive, logging, Config, ImageStore};

struct Args {
    config_path: Option<PathBuf>,
    command: Command,
}

enum Command {
    Status,
    TreeList { status: Option<TreeStatus> },
    TreeAdd { species: String, name: String },
    PhotoAdd { tree_number: i64, files: Vec<PathBuf> },
    Export { path: PathBuf },
    Import { path: PathBuf, merge: bool },
    Remind,
}

fn parse_args() -> Args {
    let args: Vec<String> = std::env::args().collect();
    let mut config_path = None;
    let mut rest: Vec<String> = Vec::new();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("shohin {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    config_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                } else {
                    eprintln!("Error: --config requires a path argument");
                    std::process::exit(1);
                }
            }
            other => rest.push(other.to_string()),
        }
        i += 1;
    }

    let command = match parse_command(&rest) {
        Ok(command) => command,
        Err(msg) => {
            eprintln!("Error: {msg}");
            print_help();
            std::process::exit(1);
        }
    };

    Args {
        config_path,
        command,
    }
}

fn parse_command(rest: &[String]) -> std::result::Result<Command, String> {
    let mut it = rest.iter().map(String::as_str);
    let command = match it.next() {
        None | Some("status") => Command::Status,
        Some("tree") => match it.next() {
            Some("list") => {
                let status = match it.next() {
                    None => Some(TreeStatus::Active),
                    Some("--all") => None,
                    Some("--graveyard") => Some(TreeStatus::Graveyard),
                    Some(other) => return Err(format!("unknown tree list flag: {other}")),
                };
                Command::TreeList { status }
            }
            Some("add") => {
                let species = it.next().ok_or("tree add requires SPECIES and NAME")?;
                let name = it.next().ok_or("tree add requires SPECIES and NAME")?;
                Command::TreeAdd {
                    species: species.to_string(),
                    name: name.to_string(),
                }
            }
            other => return Err(format!("unknown tree subcommand: {other:?}")),
        },
        Some("photo") => match it.next() {
            Some("add") => {
                let tree_number = it
                    .next()
                    .ok_or("photo add requires TREE_NUMBER and FILE...")?
                    .parse::<i64>()
                    .map_err(|_| "TREE_NUMBER must be a number".to_string())?;
                let files: Vec<PathBuf> = it.by_ref().map(PathBuf::from).collect();
                if files.is_empty() {
                    return Err("photo add requires at least one FILE".to_string());
                }
                Command::PhotoAdd { tree_number, files }
            }
            other => return Err(format!("unknown photo subcommand: {other:?}")),
        },
        Some("export") => {
            let path = it.next().ok_or("export requires an archive path")?;
            Command::Export {
                path: PathBuf::from(path),
            }
        }
        Some("import") => {
            let path = it.next().ok_or("import requires an archive path")?;
            let merge = match it.next() {
                None => false,
                Some("--merge") => true,
                Some(other) => return Err(format!("unknown import flag: {other}")),
            };
            Command::Import {
                path: PathBuf::from(path),
                merge,
            }
        }
        Some("remind") => Command::Remind,
        Some(other) => return Err(format!("unknown command: {other}")),
    };
    if let Some(extra) = it.next() {
        return Err(format!("unexpected argument: {extra}"));
    }
    Ok(command)
}

fn print_help() {
    println!(
        r#"shohin - bonsai collection record keeper

USAGE:
    shohin [OPTIONS] [COMMAND]

COMMANDS:
    status                       Collection overview (default)
    tree list [--all|--graveyard]
                                 List trees (active by default)
    tree add SPECIES NAME        Register a new tree
    photo add TREE_NUMBER FILE...
                                 Attach photos to a tree
    export PATH                  Write the whole collection to an archive
    import PATH [--merge]        Restore a collection from an archive
    remind                       Show reminders that are due

OPTIONS:
    --config, -c PATH   Path to config file
    --version, -V       Show version
    --help, -h          Show this help message

ENVIRONMENT:
    SHOHIN_LOG          Log level (trace, debug, info, warn, error)

Config file location: $XDG_CONFIG_HOME/shohin/config.toml"#
    );
}

fn main() -> Result<()> {
    let args = parse_args();
    let _ = logging::init(None);

    let config = Config::load(args.config_path.as_deref())?;
    let db = Database::open(&config.db_path)?;
    db.initialize()?;
    let images = ImageStore::open(&config.images_dir)?;
    // Leftovers from an interrupted export/import are never resumed
    images.cleanup_stale()?;

    match args.command {
        Command::Status => {
            let counts = db.row_counts()?;
            let due = db.due_reminders(reminder_horizon(&config))?;
            println!(
                "{} trees, {} species, {} photos, {} work entries",
                counts.trees, counts.species, counts.photos, counts.work_entries
            );
            println!("{} reminder(s) due", due.len());
        }
        Command::TreeList { status } => {
            for tree in db.list_trees(status)? {
                let width = db
                    .current_trunk_width(tree.id)?
                    .map(|w| format!(", trunk {w:.1} cm"))
                    .unwrap_or_default();
                println!("#{:04} {} [{}]{}", tree.tree_number, tree.name, tree.status, width);
            }
        }
        Command::TreeAdd { species, name } => {
            let species = db.get_or_create_species(&species)?;
            let tree = db.create_tree(&NewTree {
                name,
                species_id: species.id,
                ..NewTree::default()
            })?;
            println!("created tree #{:04} \"{}\"", tree.tree_number, tree.name);
        }
        Command::PhotoAdd { tree_number, files } => {
            let tree = db
                .get_tree_by_number(tree_number)?
                .with_context(|| format!("no tree with number {tree_number}"))?;
            let created = photos::add_photo_files(&db, &images, tree.id, &files)?;
            for photo in &created {
                let flag = if photo.confidence.is_low_confidence() {
                    " (date uncertain, consider correcting)"
                } else {
                    ""
                };
                println!("added photo {} taken {}{}", photo.id, photo.taken_at, flag);
            }
        }
        Command::Export { path } => {
            let summary = archive::export_archive(&db, &images, &path)?;
            println!(
                "exported {} tree(s) and {} photo(s) to {} ({} bytes)",
                summary.trees,
                summary.photos,
                summary.path.display(),
                summary.bytes
            );
        }
        Command::Import { path, merge } => {
            let mode = if merge {
                archive::ImportMode::Merge
            } else {
                archive::ImportMode::Replace
            };
            let summary = archive::import_archive(&db, &images, &path, mode)?;
            println!(
                "imported {} tree(s) and {} photo(s)",
                summary.trees, summary.photos
            );
        }
        Command::Remind => {
            let horizon = reminder_horizon(&config);
            let due = db.unnotified_due_reminders(horizon)?;
            if due.is_empty() {
                println!("nothing due");
            }
            for reminder in due {
                let tree = db.get_tree(reminder.tree_id)?;
                println!(
                    "#{:04} {}: {} (due {})",
                    tree.tree_number, tree.name, reminder.message, reminder.due_on
                );
                db.mark_reminder_notified(reminder.id)?;
            }
        }
    }

    Ok(())
}

fn reminder_horizon(config: &Config) -> chrono::NaiveDate {
    chrono::Local::now().date_naive()
        + chrono::Days::new(u64::from(config.reminders.lookahead_days))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cmd(parts: &[&str]) -> std::result::Result<Command, String> {
        let parts: Vec<String> = parts.iter().map(|s| s.to_string()).collect();
        parse_command(&parts)
    }

    #[test]
    fn test_parse_command_variants() {
        assert!(matches!(cmd(&[]), Ok(Command::Status)));
        assert!(matches!(
            cmd(&["tree", "list"]),
            Ok(Command::TreeList {
                status: Some(TreeStatus::Active)
            })
        ));
        assert!(matches!(
            cmd(&["tree", "list", "--all"]),
            Ok(Command::TreeList { status: None })
        ));
        assert!(matches!(
            cmd(&["import", "backup.zip", "--merge"]),
            Ok(Command::Import { merge: true, .. })
        ));
        assert!(cmd(&["photo", "add", "1"]).is_err());
        assert!(cmd(&["photo", "add", "x", "a.jpg"]).is_err());
        assert!(cmd(&["frobnicate"]).is_err());
        assert!(cmd(&["export"]).is_err());
        assert!(cmd(&["status", "extra"]).is_err());
    }
}
