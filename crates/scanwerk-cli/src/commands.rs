// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Subcommand implementations on top of `ScanService`.

use std::path::PathBuf;

use anyhow::{Context, Result, anyhow, bail};
use chrono::Utc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use scanwerk_core::types::{
    Document, DocumentId, FilterId, Folder, FolderColor, Orientation, OutputQuality, PaperSize,
};
use scanwerk_document::CancelFlag;
use scanwerk_engine::{AssemblyRequest, ScanService, ServiceEvent, configured_options};
use scanwerk_store::{DocumentQuery, SortBy};

/// Arguments of `scanwerk scan`.
#[derive(Debug)]
pub struct ScanArgs {
    pub images: Vec<PathBuf>,
    pub name: Option<String>,
    pub filter: Option<String>,
    pub paper: Option<String>,
    pub landscape: bool,
    pub quality: Option<String>,
    pub margin: Option<f32>,
    pub output: Option<PathBuf>,
    pub folder: Option<String>,
}

pub async fn scan(service: &ScanService, args: ScanArgs) -> Result<()> {
    // Reject bad flags before touching the store.
    let filter = args
        .filter
        .as_deref()
        .map(str::parse::<FilterId>)
        .transpose()?;
    let paper = args.paper.as_deref().map(str::parse::<PaperSize>).transpose()?;
    let quality = args
        .quality
        .as_deref()
        .map(str::parse::<OutputQuality>)
        .transpose()?;
    if let Some(margin) = args.margin {
        if !margin.is_finite() || margin < 0.0 {
            bail!("margin must be a non-negative number of millimetres, got {margin}");
        }
    }
    let folder = match &args.folder {
        Some(needle) => Some(resolve_folder(service, needle)?),
        None => None,
    };

    let mut captures = Vec::with_capacity(args.images.len());
    for path in &args.images {
        let raw = tokio::fs::read(path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;
        captures.push(raw);
    }

    let id = service.start_document(args.name.as_deref());
    match build_document(service, &id, captures, filter, paper, quality, &args).await {
        Ok(document) => {
            if let Some(folder) = folder {
                service.add_to_folder(&folder.id, &id)?;
                info!(folder = %folder.name, "document filed");
            }
            println!("{}", document_line(&document));
            if let Some(path) = &document.assembled_path {
                println!("  {}", path.display());
            }
            Ok(())
        }
        Err(e) => {
            if let Err(cleanup) = service.delete_document(&id).await {
                warn!(error = %cleanup, "could not discard unfinished draft");
            }
            Err(e)
        }
    }
}

async fn build_document(
    service: &ScanService,
    id: &DocumentId,
    captures: Vec<Vec<u8>>,
    filter: Option<FilterId>,
    paper: Option<PaperSize>,
    quality: Option<OutputQuality>,
    args: &ScanArgs,
) -> Result<Document> {
    let total = captures.len();
    let mut handles = Vec::with_capacity(total);
    for raw in captures {
        handles.push(service.capture(id, raw, Utc::now()).await?);
    }
    for (i, handle) in handles.into_iter().enumerate() {
        let page = handle.page_id();
        match handle.wait().await {
            Ok(outcome) if outcome.quad.is_some() => {
                eprintln!("page {}/{total}: corrected ({:.2})", i + 1, outcome.confidence)
            }
            Ok(_) => eprintln!("page {}/{total}: kept as captured", i + 1),
            Err(e) => warn!(page_id = %page, error = %e, "page correction failed"),
        }
    }

    if let Some(filter) = filter {
        service.set_filter_all(id, filter.as_str()).await?;
        eprintln!("filter: {}", filter.label());
    }

    let draft = service.document(id).await?;
    let mut options = configured_options(&service.config(), &draft);
    if let Some(paper) = paper {
        options.paper_size = paper;
    }
    if args.landscape {
        options.orientation = Orientation::Landscape;
    }
    if let Some(quality) = quality {
        options.quality = quality;
    }
    if let Some(margin) = args.margin {
        options.margin_mm = margin;
    }

    let cancel = CancelFlag::new();
    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("cancelling...");
                cancel.cancel();
            }
        })
    };
    let progress = tokio::spawn(report_progress(service.subscribe(), *id));

    let request = AssemblyRequest {
        destination: args.output.clone(),
        options: Some(options),
        cancel,
    };
    let result = service.assemble_with(id, request).await?.wait().await;
    interrupt.abort();
    progress.abort();

    result.context("document was not saved")
}

async fn report_progress(
    mut events: tokio::sync::broadcast::Receiver<ServiceEvent>,
    id: DocumentId,
) {
    loop {
        match events.recv().await {
            Ok(ServiceEvent::AssemblyProgress {
                document_id,
                done,
                total,
            }) if document_id == id => eprintln!("assembling {done}/{total}"),
            Ok(_) => {}
            Err(RecvError::Lagged(_)) => {}
            Err(RecvError::Closed) => break,
        }
    }
}

pub fn list(service: &ScanService, search: Option<String>, sort: Option<String>) -> Result<()> {
    let sort = sort.as_deref().map(str::parse::<SortBy>).transpose()?;
    let documents = service.documents(&DocumentQuery { text: search, sort })?;
    if documents.is_empty() {
        println!("no documents");
    }
    for document in &documents {
        println!("{}", document_line(document));
    }
    Ok(())
}

pub fn show(service: &ScanService, needle: &str) -> Result<()> {
    let document = resolve_document(service, needle)?;
    println!("{}", serde_json::to_string_pretty(&document)?);
    let folders = service.folders_for_document(&document.id)?;
    if !folders.is_empty() {
        let names: Vec<String> = folders
            .iter()
            .filter_map(|id| service.folder(id).ok().flatten())
            .map(|f| f.name)
            .collect();
        println!("folders: {}", names.join(", "));
    }
    Ok(())
}

pub async fn rename(service: &ScanService, needle: &str, name: &str) -> Result<()> {
    let document = resolve_document(service, needle)?;
    service.rename_document(&document.id, name).await?;
    println!("renamed {} to {:?}", short_id(&document.id.to_string()), name.trim());
    Ok(())
}

pub async fn delete(service: &ScanService, needle: &str, confirmed: bool) -> Result<()> {
    let document = resolve_document(service, needle)?;
    if !confirmed {
        bail!(
            "refusing to delete {:?} without --yes (this removes its PDF and page images)",
            document.name
        );
    }
    service.delete_document(&document.id).await?;
    println!("deleted {:?}", document.name);
    Ok(())
}

pub fn folder_create(service: &ScanService, name: &str, color: Option<&str>) -> Result<()> {
    let color = color.map(str::parse::<FolderColor>).transpose()?;
    let folder = service.create_folder(name, color)?;
    println!("{}", folder_line(&folder));
    Ok(())
}

pub fn folder_rename(service: &ScanService, needle: &str, name: &str) -> Result<()> {
    let folder = resolve_folder(service, needle)?;
    service.rename_folder(&folder.id, name)?;
    println!("renamed {:?} to {:?}", folder.name, name.trim());
    Ok(())
}

pub fn folder_recolor(service: &ScanService, needle: &str, color: &str) -> Result<()> {
    let folder = resolve_folder(service, needle)?;
    let color: FolderColor = color.parse()?;
    service.recolor_folder(&folder.id, color)?;
    println!("{:?} is now {}", folder.name, color.name());
    Ok(())
}

pub fn folder_delete(service: &ScanService, needle: &str) -> Result<()> {
    let folder = resolve_folder(service, needle)?;
    service.delete_folder(&folder.id)?;
    println!("deleted folder {:?}", folder.name);
    Ok(())
}

pub fn folder_list(service: &ScanService) -> Result<()> {
    let folders = service.folders()?;
    if folders.is_empty() {
        println!("no folders");
    }
    for folder in &folders {
        println!("{}", folder_line(folder));
    }
    Ok(())
}

pub fn folder_add(service: &ScanService, folder: &str, document: &str) -> Result<()> {
    let folder = resolve_folder(service, folder)?;
    let document = resolve_document(service, document)?;
    if service.add_to_folder(&folder.id, &document.id)? {
        println!("added {:?} to {:?}", document.name, folder.name);
    } else {
        println!("{:?} is already in {:?}", document.name, folder.name);
    }
    Ok(())
}

pub fn folder_remove(service: &ScanService, folder: &str, document: &str) -> Result<()> {
    let folder = resolve_folder(service, folder)?;
    let document = resolve_document(service, document)?;
    if service.remove_from_folder(&folder.id, &document.id)? {
        println!("removed {:?} from {:?}", document.name, folder.name);
    } else {
        println!("{:?} is not in {:?}", document.name, folder.name);
    }
    Ok(())
}

pub fn folder_move(service: &ScanService, document: &str, from: &str, to: &str) -> Result<()> {
    let document = resolve_document(service, document)?;
    let from = resolve_folder(service, from)?;
    let to = resolve_folder(service, to)?;
    service.move_document(&document.id, &from.id, &to.id)?;
    println!("moved {:?} from {:?} to {:?}", document.name, from.name, to.name);
    Ok(())
}

pub fn stats(service: &ScanService) -> Result<()> {
    let stats = service.stats()?;
    println!(
        "{} documents • {}",
        stats.document_count,
        format_size(stats.total_bytes)
    );
    Ok(())
}

pub fn export(service: &ScanService, output: Option<PathBuf>) -> Result<()> {
    let records = service.export_records()?;
    let json = serde_json::to_string_pretty(&records)?;
    match output {
        Some(path) => {
            std::fs::write(&path, json)
                .with_context(|| format!("failed to write {}", path.display()))?;
            info!(path = %path.display(), "records exported");
        }
        None => println!("{json}"),
    }
    Ok(())
}

// -- Lookup -------------------------------------------------------------------

fn resolve_document(service: &ScanService, needle: &str) -> Result<Document> {
    let documents = service.documents(&DocumentQuery::default())?;
    let found = pick_unique(&documents, needle, |d| d.id.to_string(), |d| &d.name)?;
    Ok(found.clone())
}

fn resolve_folder(service: &ScanService, needle: &str) -> Result<Folder> {
    let folders = service.folders()?;
    let found = pick_unique(&folders, needle, |f| f.id.to_string(), |f| &f.name)?;
    Ok(found.clone())
}

/// Find the one item whose id starts with `needle` or whose name equals it
/// (case-insensitive). An exact id match always wins.
fn pick_unique<'a, T>(
    items: &'a [T],
    needle: &str,
    id: impl Fn(&T) -> String,
    name: impl Fn(&T) -> &str,
) -> Result<&'a T> {
    let needle = needle.trim();
    if needle.is_empty() {
        bail!("empty id");
    }
    if let Some(exact) = items.iter().find(|item| id(item) == needle) {
        return Ok(exact);
    }
    let lowered = needle.to_lowercase();
    let matches: Vec<&T> = items
        .iter()
        .filter(|item| {
            id(item).starts_with(&lowered) || name(item).to_lowercase() == lowered
        })
        .collect();
    match matches.as_slice() {
        [one] => Ok(*one),
        [] => Err(anyhow!("nothing matches {needle:?}")),
        many => bail!("{needle:?} is ambiguous ({} matches)", many.len()),
    }
}

// -- Formatting ---------------------------------------------------------------

fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

fn document_line(document: &Document) -> String {
    format!(
        "{}  {:<32} {:>3} pages  {:>9}  {}",
        short_id(&document.id.to_string()),
        document.name,
        document.page_count(),
        format_size(document.size_bytes),
        document.created_at.format("%Y-%m-%d %H:%M"),
    )
}

fn folder_line(folder: &Folder) -> String {
    format!(
        "{}  {:<24} {:<8} {} documents",
        short_id(&folder.id.to_string()),
        folder.name,
        folder.color.name(),
        folder.document_count(),
    )
}

fn format_size(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    let b = bytes as f64;
    if b >= MB {
        format!("{:.1} MB", b / MB)
    } else if b >= KB {
        format!("{:.1} KB", b / KB)
    } else {
        format!("{bytes} B")
    }
}
