//! Document discovery (spec §4.4).
//!
//! Produces a lazy, restartable stream of `SourceDocument`s across every
//! configured root, honoring each root's `recursive`/`types`/`mimeTypes`
//! settings and the global exclude config. Built on
//! `futures_util::stream::unfold` rather than an `async-stream` generator —
//! the pack doesn't carry `async-stream` as a library dependency anywhere,
//! only as a dev-dependency in one repo, so a hand-rolled state machine over
//! a plain `Stream` fits this corpus better than adding a new crate for it.

use futures_util::stream::{self, Stream};
use globset::{Glob, GlobSetBuilder};

use crate::config::{Config, SourceRootConfig};
use crate::error::Result;
use crate::models::SourceDocument;
use crate::source_client::SourceClient;

/// Walk state: a stack of folder ids left to visit, plus the items already
/// fetched for the folder currently being drained.
struct State<'a> {
    client: &'a SourceClient,
    roots: std::vec::IntoIter<SourceRootConfig>,
    current_root: Option<SourceRootConfig>,
    pending_folders: Vec<String>,
    buffer: std::vec::IntoIter<SourceDocument>,
    exclude_paths: globset::GlobSet,
    exclude_aspects: Vec<String>,
}

/// Builds the stream of documents to ingest across all configured roots.
pub fn discover<'a>(client: &'a SourceClient, config: &Config) -> impl Stream<Item = Result<SourceDocument>> + 'a {
    let mut builder = GlobSetBuilder::new();
    for pattern in &config.exclude.paths {
        if let Ok(glob) = Glob::new(pattern) {
            builder.add(glob);
        }
    }
    let exclude_paths = builder.build().unwrap_or_else(|_| GlobSetBuilder::new().build().unwrap());

    let state = State {
        client,
        roots: config.sources.clone().into_iter(),
        current_root: None,
        pending_folders: Vec::new(),
        buffer: Vec::new().into_iter(),
        exclude_paths,
        exclude_aspects: config.exclude.aspects.clone(),
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(doc) = state.buffer.next() {
                if is_excluded(&doc, &state.exclude_paths, &state.exclude_aspects) {
                    continue;
                }
                if let Some(root) = &state.current_root {
                    if doc.is_folder && root.recursive {
                        state.pending_folders.push(doc.id.clone());
                    }
                    if doc.is_folder {
                        continue;
                    }
                    if !type_matches(&doc, root) {
                        continue;
                    }
                }
                return Some((Ok(doc), state));
            }

            if let Some(folder_id) = state.pending_folders.pop() {
                match state.client.list_all_children(&folder_id).await {
                    Ok(items) => {
                        state.buffer = items.into_iter();
                        continue;
                    }
                    Err(e) => return Some((Err(e), state)),
                }
            }

            if let Some(root) = state.roots.next() {
                state.pending_folders = vec![root.path.clone()];
                state.current_root = Some(root);
                continue;
            }

            return None;
        }
    })
}

fn type_matches(doc: &SourceDocument, root: &SourceRootConfig) -> bool {
    let type_ok = root.types.is_empty() || root.types.iter().any(|t| t == &doc.node_type);
    let mime_ok = root.mime_types.is_empty()
        || doc
            .mime_type
            .as_ref()
            .is_some_and(|m| root.mime_types.iter().any(|t| t == m));
    type_ok && mime_ok
}

fn is_excluded(doc: &SourceDocument, exclude_paths: &globset::GlobSet, exclude_aspects: &[String]) -> bool {
    if exclude_paths.is_match(&doc.path) {
        return true;
    }
    exclude_aspects.iter().any(|a| doc.aspect_names.iter().any(|x| x == a))
}
