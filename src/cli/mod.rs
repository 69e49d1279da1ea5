use crate::compress::DEFAULT_LEVEL;
use crate::hashcheck::HashAlgorithm;
use clap::{ArgAction, Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Increase log output (-v info, -vv debug, -vvv trace). RUST_LOG overrides this.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Clone, Debug)]
pub enum Commands {
    /// Archive a file or directory tree into a single compressed (and optionally encrypted) file.
    Backup {
        /// File or directory to back up.
        #[arg(short, long, default_value = ".")]
        input: PathBuf,

        /// Archive file to create. Overwritten if it exists.
        #[arg(short, long, default_value = "backup.ark")]
        output: PathBuf,

        /// Zstandard compression level. Out-of-range values are rejected.
        #[arg(short, long, default_value_t = DEFAULT_LEVEL, allow_negative_numbers = true)]
        compression_level: i32,

        /// Archive what symlinks point to instead of the links themselves.
        #[arg(short, long, num_args = 0..=1, default_value_t = false, default_missing_value = "true", action = ArgAction::Set)]
        follow_symlinks: bool,

        #[command(flatten)]
        passphrase: PassphraseArgs,

        /// Write to a temporary file and move it into place only if the backup succeeds.
        #[arg(long)]
        atomic: bool,
    },

    /// Restore an archive into a directory.
    Restore {
        /// Archive file to restore.
        #[arg(short, long, default_value = "backup.ark")]
        input: PathBuf,

        /// Directory to restore into. Created if missing; existing files are overwritten.
        #[arg(short, long, default_value = ".")]
        output: PathBuf,

        #[command(flatten)]
        passphrase: PassphraseArgs,
    },

    /// List the entries of an archive without restoring it.
    #[command(alias = "l")]
    List {
        /// Archive file to list.
        #[arg(short, long, default_value = "backup.ark")]
        input: PathBuf,

        #[command(flatten)]
        passphrase: PassphraseArgs,

        /// Print the entries as a JSON array.
        #[arg(long)]
        json: bool,
    },

    /// Find files with identical contents in a directory.
    Hashcheck {
        /// Directory to scan.
        #[arg(short, long, default_value = ".")]
        dir: PathBuf,

        /// Digest used to compare file contents.
        #[arg(long, value_enum, default_value_t = HashAlgorithm::Sha256)]
        algo: HashAlgorithm,

        /// Print the report as JSON.
        #[arg(long)]
        json: bool,
    },
}

/// Passphrase options shared by every command that touches an archive.
#[derive(ClapArgs, Clone, Debug, Default)]
pub struct PassphraseArgs {
    /// Passphrase for the encryption layer. An empty value means no encryption.
    #[arg(short, long, conflicts_with = "ask_passphrase")]
    pub passphrase: Option<String>,

    /// Prompt for the passphrase on the terminal instead.
    #[arg(long)]
    pub ask_passphrase: bool,
}

impl PassphraseArgs {
    /// Resolves the passphrase from the command line or an interactive prompt.
    /// An empty passphrase is treated as none. `confirm` asks twice, for backups.
    pub fn resolve(&self, confirm: bool) -> Result<Option<String>, Box<dyn std::error::Error>> {
        let passphrase = if self.ask_passphrase {
            let first = rpassword::prompt_password("Passphrase: ")?;
            if confirm && !first.is_empty() {
                let second = rpassword::prompt_password("Repeat passphrase: ")?;
                if first != second {
                    return Err("passphrases do not match".into());
                }
            }
            Some(first)
        } else {
            self.passphrase.clone()
        };
        Ok(passphrase.filter(|p| !p.is_empty()))
    }
}

/// Parses command-line arguments using `clap`. Exits the process on
/// `--help`, `--version` and usage errors.
pub fn run() -> Args {
    Args::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(argv: &[&str]) -> Args {
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn backup_defaults() {
        let args = parse(&["arkive", "backup"]);
        match args.command {
            Commands::Backup { input, output, compression_level, follow_symlinks, atomic, .. } => {
                assert_eq!(input, PathBuf::from("."));
                assert_eq!(output, PathBuf::from("backup.ark"));
                assert_eq!(compression_level, DEFAULT_LEVEL);
                assert!(!follow_symlinks);
                assert!(!atomic);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn follow_symlinks_accepts_bare_and_explicit_forms() {
        for (argv, expected) in [
            (vec!["arkive", "backup", "--follow-symlinks"], true),
            (vec!["arkive", "backup", "--follow-symlinks", "true"], true),
            (vec!["arkive", "backup", "--follow-symlinks=false"], false),
        ] {
            match parse(&argv).command {
                Commands::Backup { follow_symlinks, .. } => assert_eq!(follow_symlinks, expected, "{argv:?}"),
                other => panic!("unexpected command {other:?}"),
            }
        }
    }

    #[test]
    fn empty_passphrase_means_none() {
        let args = PassphraseArgs { passphrase: Some(String::new()), ask_passphrase: false };
        assert_eq!(args.resolve(false).unwrap(), None);
        let args = PassphraseArgs { passphrase: Some("pw".into()), ask_passphrase: false };
        assert_eq!(args.resolve(false).unwrap().as_deref(), Some("pw"));
    }

    #[test]
    fn short_flags_match_long_ones() {
        match parse(&["arkive", "backup", "-i", "src", "-o", "out.ark", "-c", "19", "-f", "-p", "secret"]).command {
            Commands::Backup { input, output, compression_level, follow_symlinks, passphrase, .. } => {
                assert_eq!(input, PathBuf::from("src"));
                assert_eq!(output, PathBuf::from("out.ark"));
                assert_eq!(compression_level, 19);
                assert!(follow_symlinks);
                assert_eq!(passphrase.passphrase.as_deref(), Some("secret"));
            }
            other => panic!("unexpected command {other:?}"),
        }
        match parse(&["arkive", "restore", "-p", "secret"]).command {
            Commands::Restore { passphrase, .. } => assert_eq!(passphrase.passphrase.as_deref(), Some("secret")),
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn passphrase_flags_conflict() {
        assert!(Args::try_parse_from(["arkive", "restore", "--passphrase", "x", "--ask-passphrase"]).is_err());
    }

    #[test]
    fn verbosity_is_global() {
        let args = parse(&["arkive", "list", "-vv", "--json"]);
        assert_eq!(args.verbose, 2);
    }
}
