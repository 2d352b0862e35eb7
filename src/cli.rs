use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum CollectionArgs {
    /// Create a new collection
    Create {
        /// Collection name
        name: String,

        /// Free-form description
        #[clap(short, long, default_value = "")]
        description: String,
    },
    /// Add an item to a collection
    Add {
        /// Collection id
        id: String,

        /// Item path
        path: String,
    },
    /// List collections with their members
    List {},
    /// Delete a collection
    Remove {
        /// Collection id
        id: String,

        /// Skip confirmation
        #[clap(short, long, default_value = "false")]
        yes: bool,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum FavoriteArgs {
    /// Mark an item as favorite
    Add {
        /// Item path
        path: String,

        /// Query that surfaced the item
        #[clap(short, long, default_value = "")]
        query: String,
    },
    /// Drop an item from favorites
    Remove {
        /// Item path
        path: String,
    },
    /// List favorites
    List {},
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Build the corpus file from embeddings in JSON Lines form
    Import {
        /// Input file, one {"path", "embedding"} object per line
        input: PathBuf,

        /// Encoder name recorded in the corpus header
        #[clap(short, long, default_value = crate::search::DEFAULT_ENCODER)]
        encoder: String,
    },
    /// Search the corpus with a query vector
    Search {
        /// JSON array file with the query vector; stdin when omitted
        #[clap(short, long)]
        vector: Option<PathBuf>,

        /// How many results to return
        #[clap(short = 'k', long)]
        top_k: Option<usize>,

        /// Restrict the search to one collection
        #[clap(short, long)]
        collection: Option<String>,

        /// Corpus positions to leave out, comma separated
        #[clap(short = 'x', long)]
        exclude: Option<String>,

        /// Act as this user
        #[clap(short, long)]
        user: Option<String>,
    },
    /// Find items similar to one the corpus already has
    Similar {
        /// Item path
        path: String,

        /// How many results to return
        #[clap(short = 'k', long)]
        top_k: Option<usize>,

        /// Keep the item itself in its results
        #[clap(long, default_value = "false")]
        keep_self: bool,
    },
    /// Manage collections
    Collection {
        /// Act as this user
        #[clap(short, long)]
        user: Option<String>,

        #[clap(subcommand)]
        action: CollectionArgs,
    },
    /// Manage favorites
    Favorite {
        /// Act as this user
        #[clap(short, long)]
        user: Option<String>,

        #[clap(subcommand)]
        action: FavoriteArgs,
    },
    /// Print corpus and store statistics
    Info {},
    /// Print file facts about one item
    Inspect {
        /// Item path
        path: String,
    },
    /// Archive collections, favorites and config
    Backup {
        /// Archive path; default is timestamped, stdout when piped
        output: Option<PathBuf>,
    },
    /// Restore stores from a backup archive
    Restore {
        /// Archive path
        archive: PathBuf,

        /// Skip confirmation
        #[clap(short, long, default_value = "false")]
        yes: bool,
    },
}
