//! Remote project files
//!
//! Projects stored behind the project-files API are fetched as a whole tree;
//! files the listing leaves empty are then fetched one by one.

use url::Url;

use forge_core::prelude::*;
use forge_core::FileTree;

/// Source of project trees and file contents
#[trait_variant::make(ProjectFileSource: Send)]
pub trait LocalProjectFileSource {
    /// The project's file tree, in mount shape
    async fn fetch_tree(&self, project: &str) -> Result<FileTree>;

    /// Contents of one file, by forward-slash path
    async fn fetch_file(&self, project: &str, path: &str) -> Result<String>;
}

/// Client for `GET {api}/project-files/{name}[?file=path]`
#[derive(Debug, Clone)]
pub struct HttpProjectFiles {
    client: reqwest::Client,
    base: Url,
}

impl HttpProjectFiles {
    pub fn new(api_base: &str) -> Result<Self> {
        let base = Url::parse(api_base)
            .map_err(|e| Error::config(format!("Invalid API base '{}': {}", api_base, e)))?;
        if base.cannot_be_a_base() {
            return Err(Error::config(format!(
                "API base '{}' cannot carry a path",
                api_base
            )));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            base,
        })
    }

    /// URL of a project's listing, or of one file when `file` is given.
    pub fn project_url(&self, project: &str, file: Option<&str>) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push("project-files").push(project);
        }
        if let Some(path) = file {
            url.query_pairs_mut().append_pair("file", path);
        }
        url
    }

    async fn get(&self, url: Url) -> Result<reqwest::Response> {
        debug!("GET {}", url);
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| Error::network(format!("{}: {}", url, e)))?;

        if !response.status().is_success() {
            return Err(Error::project_files(format!(
                "HTTP {} from {}",
                response.status(),
                url
            )));
        }
        Ok(response)
    }
}

impl ProjectFileSource for HttpProjectFiles {
    async fn fetch_tree(&self, project: &str) -> Result<FileTree> {
        let response = self.get(self.project_url(project, None)).await?;
        response
            .json::<FileTree>()
            .await
            .map_err(|e| Error::project_files(format!("Malformed tree for '{}': {}", project, e)))
    }

    async fn fetch_file(&self, project: &str, path: &str) -> Result<String> {
        let response = self.get(self.project_url(project, Some(path))).await?;
        response
            .text()
            .await
            .map_err(|e| Error::network(format!("Reading '{}': {}", path, e)))
    }
}

/// Fetch a project's tree and fill in files the listing left empty.
///
/// `.git`, `node_modules` and dot-entries are dropped, as for a local tree.
/// A file that cannot be fetched stays empty and is logged; the rest of the
/// tree is still usable.
pub async fn build_remote_tree<S>(source: &S, project: &str) -> Result<FileTree>
where
    S: ProjectFileSource + ?Sized,
{
    let mut tree = source.fetch_tree(project).await?;
    let pruned = tree.prune_excluded();
    if pruned > 0 {
        debug!("Dropped {} excluded entries from '{}'", pruned, project);
    }

    let mut filled = 0;
    for (path, contents) in tree.files_mut() {
        if !contents.is_empty() {
            continue;
        }
        match source.fetch_file(project, &path).await {
            Ok(text) => {
                *contents = text;
                filled += 1;
            }
            Err(e) => warn!("Skipping contents of {}: {}", path, e),
        }
    }

    info!(
        "Fetched remote project '{}': {} files ({} fetched individually)",
        project,
        tree.file_count(),
        filled
    );
    Ok(tree)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_http::{serve, StubResponse};
    use std::collections::HashMap;

    struct MemorySource {
        tree: FileTree,
        files: HashMap<String, String>,
    }

    impl ProjectFileSource for MemorySource {
        async fn fetch_tree(&self, _project: &str) -> Result<FileTree> {
            Ok(self.tree.clone())
        }

        async fn fetch_file(&self, _project: &str, path: &str) -> Result<String> {
            self.files
                .get(path)
                .cloned()
                .ok_or_else(|| Error::project_files(format!("404 {}", path)))
        }
    }

    #[test]
    fn test_project_url() {
        let client = HttpProjectFiles::new("http://localhost:3000/api").unwrap();
        assert_eq!(
            client.project_url("todo app", None).as_str(),
            "http://localhost:3000/api/project-files/todo%20app"
        );
        assert_eq!(
            client.project_url("demo", Some("src/App.tsx")).as_str(),
            "http://localhost:3000/api/project-files/demo?file=src%2FApp.tsx"
        );

        let trailing = HttpProjectFiles::new("http://localhost:3000/api/").unwrap();
        assert_eq!(
            trailing.project_url("demo", None).as_str(),
            "http://localhost:3000/api/project-files/demo"
        );
    }

    #[test]
    fn test_invalid_api_base() {
        assert!(matches!(
            HttpProjectFiles::new("not a url"),
            Err(Error::Config { .. })
        ));
        assert!(HttpProjectFiles::new("mailto:dev@example.com").is_err());
    }

    #[tokio::test]
    async fn test_build_remote_tree_fills_empty_files() {
        let mut tree = FileTree::new();
        tree.insert_file("package.json", "{}").unwrap();
        tree.insert_file("src/App.tsx", "").unwrap();
        tree.insert_file("src/missing.ts", "").unwrap();

        let source = MemorySource {
            tree,
            files: HashMap::from([(
                "src/App.tsx".to_string(),
                "export default () => null".to_string(),
            )]),
        };

        let tree = build_remote_tree(&source, "demo").await.unwrap();
        assert_eq!(tree.file_contents("package.json"), Some("{}"));
        assert_eq!(
            tree.file_contents("src/App.tsx"),
            Some("export default () => null")
        );
        assert_eq!(tree.file_contents("src/missing.ts"), Some(""));
    }

    #[tokio::test]
    async fn test_build_remote_tree_drops_excluded_entries() {
        let mut tree = FileTree::new();
        tree.insert_file("index.html", "<div/>").unwrap();
        tree.insert_file(".env", "SECRET=1").unwrap();
        tree.insert_file(".git/HEAD", "ref: refs/heads/main").unwrap();
        tree.insert_file("node_modules/react/index.js", "").unwrap();
        tree.insert_file("src/.DS_Store", "").unwrap();

        // Nothing to fetch: every empty file lives in an excluded entry
        let source = MemorySource {
            tree,
            files: HashMap::new(),
        };

        let tree = build_remote_tree(&source, "demo").await.unwrap();
        assert_eq!(
            tree.walk().into_iter().map(|(p, _)| p).collect::<Vec<_>>(),
            vec!["src", "index.html"]
        );
    }

    #[tokio::test]
    async fn test_http_fetch_tree_and_file() {
        let server = serve(vec![
            StubResponse::json(
                r#"{"package.json":{"file":{"contents":"{}"}},"src":{"directory":{"main.tsx":{"file":{"contents":""}}}}}"#,
            ),
            StubResponse::text("import App from './App'"),
        ])
        .await;
        let client = HttpProjectFiles::new(&format!("{}/api", server.base)).unwrap();

        let tree = build_remote_tree(&client, "demo").await.unwrap();

        assert_eq!(tree.file_contents("src/main.tsx"), Some("import App from './App'"));
        assert_eq!(
            server.requests(),
            vec![
                "GET /api/project-files/demo HTTP/1.1",
                "GET /api/project-files/demo?file=src%2Fmain.tsx HTTP/1.1",
            ]
        );
    }

    #[tokio::test]
    async fn test_http_error_status() {
        let server = serve(vec![StubResponse::status(404)]).await;
        let client = HttpProjectFiles::new(&server.base).unwrap();

        let err = ProjectFileSource::fetch_tree(&client, "nope")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ProjectFiles { .. }));
    }
}
