// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Scanwerk — document scanner
//
// Entry point. Initialises logging, opens the scan service in the data
// directory, and dispatches subcommands.

mod commands;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use scanwerk_engine::ScanService;
use scanwerk_engine::data_dir::data_dir;

#[derive(Parser, Debug)]
#[command(name = "scanwerk")]
#[command(version, about = "Turn page photographs into PDF documents and keep them organised", long_about = None)]
struct Cli {
    /// Data directory (default: $XDG_DATA_HOME/scanwerk)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Correct, filter and assemble captured pages into a PDF
    Scan {
        /// Page images, in page order
        #[arg(required = true)]
        images: Vec<PathBuf>,

        /// Document name (default: Scan_YYYY_MM_DD)
        #[arg(short, long)]
        name: Option<String>,

        /// Filter for every page: original, grayscale, blackwhite, contrast, bright
        #[arg(short, long)]
        filter: Option<String>,

        /// Paper size: a4, a3, a5, letter, legal, tabloid
        #[arg(long)]
        paper: Option<String>,

        /// Landscape pages
        #[arg(long)]
        landscape: bool,

        /// Page image quality: low, medium, high
        #[arg(long)]
        quality: Option<String>,

        /// Blank border around each page image, in millimetres
        #[arg(long)]
        margin: Option<f32>,

        /// Output PDF path (default: the documents directory)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Put the new document in this folder (id prefix or name)
        #[arg(long)]
        folder: Option<String>,
    },

    /// List documents, newest first
    List {
        /// Only names containing this text (case-insensitive)
        #[arg(short, long)]
        search: Option<String>,

        /// Sort order: date, name, size
        #[arg(long)]
        sort: Option<String>,
    },

    /// Show one document
    Show {
        /// Document id or unique id prefix
        document: String,
    },

    /// Rename a document
    Rename { document: String, name: String },

    /// Delete a document, its PDF, thumbnail and page images
    Delete {
        document: String,

        /// Confirm the deletion
        #[arg(short, long)]
        yes: bool,
    },

    /// Manage folders
    Folder {
        #[command(subcommand)]
        action: FolderCommand,
    },

    /// Document count and total size
    Stats,

    /// Dump every document and folder record as JSON
    Export {
        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand, Debug)]
enum FolderCommand {
    /// Create a folder
    Create {
        name: String,

        /// Palette colour name or hex code (default: next in the palette)
        #[arg(short, long)]
        color: Option<String>,
    },
    /// Rename a folder
    Rename { folder: String, name: String },
    /// Change a folder's colour
    Recolor { folder: String, color: String },
    /// Delete a folder (its documents are kept)
    Delete { folder: String },
    /// List folders
    List,
    /// Add a document to a folder
    Add { folder: String, document: String },
    /// Remove a document from a folder
    Remove { folder: String, document: String },
    /// Move a document from one folder to another
    Move {
        document: String,
        from: String,
        to: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let dir = data_dir(cli.data_dir.as_deref())?;
    tracing::debug!(path = %dir.display(), "using data directory");
    let service = ScanService::open(&dir)?;

    match cli.command {
        Commands::Scan {
            images,
            name,
            filter,
            paper,
            landscape,
            quality,
            margin,
            output,
            folder,
        } => {
            let args = commands::ScanArgs {
                images,
                name,
                filter,
                paper,
                landscape,
                quality,
                margin,
                output,
                folder,
            };
            commands::scan(&service, args).await
        }
        Commands::List { search, sort } => commands::list(&service, search, sort),
        Commands::Show { document } => commands::show(&service, &document),
        Commands::Rename { document, name } => commands::rename(&service, &document, &name).await,
        Commands::Delete { document, yes } => commands::delete(&service, &document, yes).await,
        Commands::Folder { action } => match action {
            FolderCommand::Create { name, color } => {
                commands::folder_create(&service, &name, color.as_deref())
            }
            FolderCommand::Rename { folder, name } => {
                commands::folder_rename(&service, &folder, &name)
            }
            FolderCommand::Recolor { folder, color } => {
                commands::folder_recolor(&service, &folder, &color)
            }
            FolderCommand::Delete { folder } => commands::folder_delete(&service, &folder),
            FolderCommand::List => commands::folder_list(&service),
            FolderCommand::Add { folder, document } => {
                commands::folder_add(&service, &folder, &document)
            }
            FolderCommand::Remove { folder, document } => {
                commands::folder_remove(&service, &folder, &document)
            }
            FolderCommand::Move { document, from, to } => {
                commands::folder_move(&service, &document, &from, &to)
            }
        },
        Commands::Stats => commands::stats(&service),
        Commands::Export { output } => commands::export(&service, output),
    }
}
