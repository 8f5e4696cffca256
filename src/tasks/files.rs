use crate::config::Configuration;
use crate::events::InventoryEvent;
use crate::media::MediaReference;
use crate::playlist::Playlist;
use anyhow::Result;
use notify::event::{CreateKind, ModifyKind, RemoveKind};
use notify::{Event, EventKind, RecursiveMode, Watcher, recommended_watcher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};
use walkdir::{DirEntry, WalkDir};

/// Recursive startup scan of the media library, in path order.
pub fn discover(root: &Path) -> Vec<MediaReference> {
    let mut found: Vec<PathBuf> = WalkDir::new(root)
        .follow_links(true)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_hidden(e))
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .map(DirEntry::into_path)
        .collect();
    found.sort();
    let refs: Vec<MediaReference> = found
        .iter()
        .filter_map(|p| MediaReference::from_path(p))
        .collect();
    info!(
        root = %root.display(),
        discovered = refs.len(),
        "startup recursive scan complete"
    );
    refs
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .is_some_and(|name| name.starts_with('.'))
}

/// Watch the library and keep `playlist` in step with the filesystem.
#[instrument(skip_all, fields(root = %cfg.media_library_path.display()))]
pub async fn run(cfg: Configuration, playlist: Arc<Playlist>, cancel: CancellationToken) -> Result<()> {
    // bridge notify callback -> async channel
    let (watch_tx, mut watch_rx) = mpsc::channel::<notify::Result<Event>>(128);
    let mut watcher = recommended_watcher(move |res| {
        let _ = watch_tx.blocking_send(res);
    })?;
    watcher.watch(&cfg.media_library_path, RecursiveMode::Recursive)?;
    info!("notify watcher initialized (recursive)");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("cancel received; exiting files task");
                break;
            }

            Some(res) = watch_rx.recv() => match res {
                Ok(event) => {
                    for inv in translate(event) {
                        playlist.apply(inv);
                    }
                }
                Err(err) => error!("watch error: {err}"),
            }
        }
    }
    Ok(())
}

/// Map one notify event onto collection edits.
pub fn translate(event: Event) -> Vec<InventoryEvent> {
    debug!(kind = ?event.kind, paths = ?event.paths, "notify event");
    let mut out = Vec::new();
    match event.kind {
        EventKind::Create(CreateKind::File) => {
            for p in event.paths {
                if let Some(r) = MediaReference::from_path(&p) {
                    info!(path = %p.display(), "fs: add (create)");
                    out.push(InventoryEvent::MediaAdded(r));
                }
            }
        }
        EventKind::Remove(RemoveKind::File) => {
            for p in event.paths {
                if MediaReference::from_path(&p).is_some() {
                    info!(path = %p.display(), "fs: remove");
                    out.push(InventoryEvent::MediaRemoved(p));
                }
            }
        }
        EventKind::Modify(ModifyKind::Name(_)) => {
            // renames arrive as Name(Any) on some platforms; decide by existence
            for p in event.paths {
                let Some(r) = MediaReference::from_path(&p) else {
                    continue;
                };
                if p.exists() {
                    info!(path = %p.display(), "fs: add (rename)");
                    out.push(InventoryEvent::MediaAdded(r));
                } else {
                    info!(path = %p.display(), "fs: remove (rename)");
                    out.push(InventoryEvent::MediaRemoved(p));
                }
            }
        }
        kind => debug!(?kind, "fs: ignored"),
    }
    out
}
