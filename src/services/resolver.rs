//! 文件解析 - 业务能力层
//!
//! 负责"把一个文件引用变成内存中的结构化数据"：
//! 下载（带退避重试）、按类型解析（表格 / JSON / 文本 / 压缩包 /
//! 原始字节）、会话级内容哈希缓存。同一 URL 在一个会话内最多
//! 下载一次；内容相同的不同 URL 复用同一份解析结果。

use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use flate2::read::GzDecoder;
use sha2::{Digest, Sha256};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{AgentError, Result};
use crate::models::{ArchiveEntry, ColumnType, DownloadedFile, FileContent, FileKind, TableData};

/// 一次下载的原始结果
#[derive(Debug, Clone)]
pub struct FetchedBytes {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

/// 下载能力
///
/// 抽出来是为了让缓存行为（一个 URL 只取一次）可以被计数断言
#[async_trait]
pub trait FileFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchedBytes>;
}

/// 基于 reqwest 的下载器
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FileFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedBytes> {
        let response = self.client.get(url).send().await.map_err(|e| {
            AgentError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        })?;

        if !response.status().is_success() {
            return Err(AgentError::DownloadFailed {
                url: url.to_string(),
                reason: format!("HTTP {}", response.status()),
            });
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        let bytes = response
            .bytes()
            .await
            .map_err(|e| AgentError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            })?
            .to_vec();

        Ok(FetchedBytes { bytes, content_type })
    }
}

/// 文件解析器
///
/// 缓存归单个会话私有，会话结束时随暂存目录一起丢弃
pub struct FileResolver {
    fetcher: Box<dyn FileFetcher>,
    downloads_dir: PathBuf,
    download_attempts: usize,
    backoff_base: Duration,
    max_archive_depth: usize,
    by_url: Mutex<HashMap<String, Arc<DownloadedFile>>>,
    by_hash: Mutex<HashMap<String, Arc<DownloadedFile>>>,
}

impl FileResolver {
    pub fn new(fetcher: Box<dyn FileFetcher>, scratch_dir: &Path, config: &Config) -> Result<Self> {
        let downloads_dir = scratch_dir.join("downloads");
        std::fs::create_dir_all(&downloads_dir)?;
        Ok(Self {
            fetcher,
            downloads_dir,
            download_attempts: config.download_attempts.max(1),
            backoff_base: Duration::from_millis(config.backoff_base_ms),
            max_archive_depth: config.max_archive_depth,
            by_url: Mutex::new(HashMap::new()),
            by_hash: Mutex::new(HashMap::new()),
        })
    }

    /// 解析一个文件引用
    ///
    /// # 参数
    /// - `url`: 文件 URL
    /// - `kind_hint`: 快照里推断出的类型（可选）
    pub async fn resolve(
        &self,
        url: &str,
        kind_hint: Option<FileKind>,
    ) -> Result<Arc<DownloadedFile>> {
        if let Some(hit) = self.by_url.lock().unwrap().get(url) {
            debug!("文件缓存命中 (URL): {}", url);
            return Ok(hit.clone());
        }

        let fetched = self.fetch_with_retry(url).await?;
        let hash = hex::encode(Sha256::digest(&fetched.bytes));

        // 内容相同的不同 URL 复用已有解析
        if let Some(hit) = self.by_hash.lock().unwrap().get(&hash).cloned() {
            debug!("文件缓存命中 (内容哈希): {}", url);
            self.by_url
                .lock()
                .unwrap()
                .insert(url.to_string(), hit.clone());
            return Ok(hit);
        }

        let local_path = self.persist(url, &hash, &fetched.bytes)?;
        let kind = kind_hint
            .or_else(|| FileKind::from_url(url))
            .unwrap_or_else(|| {
                fetched
                    .content_type
                    .as_deref()
                    .map(FileKind::from_content_type)
                    .unwrap_or(FileKind::Opaque)
            });

        let content = parse_content(url, &fetched.bytes, kind, 0, self.max_archive_depth)?;
        info!("✓ 文件已解析: {} ({})", url, content.describe());

        let file = Arc::new(DownloadedFile {
            url: url.to_string(),
            hash: hash.clone(),
            local_path,
            content,
        });
        self.by_hash.lock().unwrap().insert(hash, file.clone());
        self.by_url
            .lock()
            .unwrap()
            .insert(url.to_string(), file.clone());
        Ok(file)
    }

    /// 带指数退避的下载
    async fn fetch_with_retry(&self, url: &str) -> Result<FetchedBytes> {
        let mut last_err = None;
        for attempt in 1..=self.download_attempts {
            match self.fetcher.fetch(url).await {
                Ok(fetched) => return Ok(fetched),
                Err(e) => {
                    warn!(
                        "下载失败 (第 {}/{} 次): {}",
                        attempt, self.download_attempts, e
                    );
                    last_err = Some(e);
                    if attempt < self.download_attempts {
                        sleep(self.backoff_base * (1u32 << (attempt - 1).min(16))).await;
                    }
                }
            }
        }
        Err(last_err.unwrap_or_else(|| AgentError::DownloadFailed {
            url: url.to_string(),
            reason: "下载尝试次数为 0".to_string(),
        }))
    }

    /// 把原始字节落到暂存区
    fn persist(&self, url: &str, hash: &str, bytes: &[u8]) -> Result<PathBuf> {
        let basename = url
            .split(['?', '#'])
            .next()
            .and_then(|p| p.rsplit('/').next())
            .filter(|n| !n.is_empty())
            .unwrap_or("download");
        let safe_name: String = basename
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        let path = self.downloads_dir.join(format!("{}_{}", &hash[..8], safe_name));
        std::fs::write(&path, bytes)?;
        Ok(path)
    }
}

/// 按类型解析字节内容
///
/// 压缩包递归解析，深度有界
fn parse_content(
    url: &str,
    bytes: &[u8],
    kind: FileKind,
    depth: usize,
    max_depth: usize,
) -> Result<FileContent> {
    match kind {
        FileKind::Csv => {
            let text =
                std::str::from_utf8(bytes).map_err(|_| AgentError::UnsupportedFormat {
                    url: url.to_string(),
                    detail: "表格内容不是有效 UTF-8".to_string(),
                })?;
            let table = parse_table(text).ok_or_else(|| AgentError::UnsupportedFormat {
                url: url.to_string(),
                detail: "表格内容为空".to_string(),
            })?;
            Ok(FileContent::Table(table))
        }
        FileKind::Json => serde_json::from_slice(bytes)
            .map(FileContent::Json)
            .map_err(|e| AgentError::UnsupportedFormat {
                url: url.to_string(),
                detail: format!("JSON 解析失败: {}", e),
            }),
        FileKind::Text => Ok(FileContent::Text(
            String::from_utf8_lossy(bytes).into_owned(),
        )),
        FileKind::Gzip => {
            if depth >= max_depth {
                return Err(AgentError::ArchiveDepthExceeded {
                    url: url.to_string(),
                    max_depth,
                });
            }
            let mut inner = Vec::new();
            GzDecoder::new(bytes)
                .read_to_end(&mut inner)
                .map_err(|e| AgentError::UnsupportedFormat {
                    url: url.to_string(),
                    detail: format!("gzip 解压失败: {}", e),
                })?;
            let inner_kind = gzip_inner_kind(url, &inner);
            parse_content(url, &inner, inner_kind, depth + 1, max_depth)
        }
        FileKind::Tar => {
            if depth >= max_depth {
                return Err(AgentError::ArchiveDepthExceeded {
                    url: url.to_string(),
                    max_depth,
                });
            }
            let mut entries = Vec::new();
            let mut archive = tar::Archive::new(bytes);
            let iter = archive
                .entries()
                .map_err(|e| AgentError::UnsupportedFormat {
                    url: url.to_string(),
                    detail: format!("tar 读取失败: {}", e),
                })?;
            for entry in iter {
                let mut entry = entry.map_err(|e| AgentError::UnsupportedFormat {
                    url: url.to_string(),
                    detail: format!("tar 条目损坏: {}", e),
                })?;
                if !entry.header().entry_type().is_file() {
                    continue;
                }
                let name = entry
                    .path()
                    .map(|p| p.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let mut data = Vec::new();
                entry.read_to_end(&mut data)?;
                let entry_kind = FileKind::from_url(&name).unwrap_or(FileKind::Opaque);
                let content = parse_content(url, &data, entry_kind, depth + 1, max_depth)?;
                entries.push(ArchiveEntry { name, content });
            }
            Ok(FileContent::Archive(entries))
        }
        FileKind::Opaque => Ok(FileContent::Raw(bytes.to_vec())),
    }
}

/// 推断 gzip 内层的类型
///
/// `.tgz` / `.tar.gz` 视为 tar，其余按去掉 `.gz` 后的扩展名判断，
/// 再不行就嗅探 tar 魔数
fn gzip_inner_kind(url: &str, inner: &[u8]) -> FileKind {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let name = path.rsplit('/').next().unwrap_or(path).to_ascii_lowercase();
    if name.ends_with(".tgz") || name.ends_with(".tar.gz") {
        return FileKind::Tar;
    }
    if let Some(stripped) = name.strip_suffix(".gz") {
        if let Some(kind) = FileKind::from_url(stripped) {
            return kind;
        }
    }
    // tar 魔数 "ustar" 位于偏移 257
    if inner.len() > 262 && &inner[257..262] == b"ustar" {
        return FileKind::Tar;
    }
    FileKind::Opaque
}

/// 解析分隔文本为表格
///
/// 首行为表头；分隔符按首行的制表符/逗号数量判断；
/// 引号内的分隔符和换行按 RFC 4180 规则处理
fn parse_table(text: &str) -> Option<TableData> {
    let first_line = text.lines().next()?;
    let delim = if first_line.matches('\t').count() > first_line.matches(',').count() {
        '\t'
    } else {
        ','
    };

    let mut rows = parse_delimited(text, delim);
    rows.retain(|row| row.iter().any(|cell| !cell.trim().is_empty()));
    if rows.is_empty() {
        return None;
    }

    let headers: Vec<String> = rows.remove(0).iter().map(|h| h.trim().to_string()).collect();
    let width = headers.len();
    for row in rows.iter_mut() {
        row.resize(width, String::new());
    }
    let column_types = infer_column_types(width, &rows);

    Some(TableData {
        headers,
        column_types,
        rows,
    })
}

fn parse_delimited(text: &str, delim: char) -> Vec<Vec<String>> {
    let mut rows = Vec::new();
    let mut row: Vec<String> = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            if c == '"' {
                if chars.peek() == Some(&'"') {
                    field.push('"');
                    chars.next();
                } else {
                    in_quotes = false;
                }
            } else {
                field.push(c);
            }
        } else if c == '"' && field.is_empty() {
            in_quotes = true;
        } else if c == delim {
            row.push(std::mem::take(&mut field));
        } else if c == '\n' {
            row.push(std::mem::take(&mut field));
            rows.push(std::mem::take(&mut row));
        } else if c != '\r' {
            field.push(c);
        }
    }
    if !field.is_empty() || !row.is_empty() {
        row.push(field);
        rows.push(row);
    }
    rows
}

/// 按整列取值推断列类型，空单元格不参与判定
fn infer_column_types(width: usize, rows: &[Vec<String>]) -> Vec<ColumnType> {
    (0..width)
        .map(|col| {
            let mut any = false;
            let mut all_int = true;
            let mut all_float = true;
            for row in rows {
                let cell = row[col].trim();
                if cell.is_empty() {
                    continue;
                }
                any = true;
                if cell.parse::<i64>().is_err() {
                    all_int = false;
                }
                if cell.parse::<f64>().is_err() {
                    all_float = false;
                }
            }
            if !any {
                ColumnType::Text
            } else if all_int {
                ColumnType::Integer
            } else if all_float {
                ColumnType::Float
            } else {
                ColumnType::Text
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// 计数下载器：记录实际发起的网络请求次数
    struct CountingFetcher {
        count: Arc<AtomicUsize>,
        bytes: Vec<u8>,
    }

    #[async_trait]
    impl FileFetcher for CountingFetcher {
        async fn fetch(&self, _url: &str) -> Result<FetchedBytes> {
            self.count.fetch_add(1, Ordering::SeqCst);
            Ok(FetchedBytes {
                bytes: self.bytes.clone(),
                content_type: None,
            })
        }
    }

    /// 总是失败的下载器
    struct FailingFetcher {
        count: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl FileFetcher for FailingFetcher {
        async fn fetch(&self, url: &str) -> Result<FetchedBytes> {
            self.count.fetch_add(1, Ordering::SeqCst);
            Err(AgentError::DownloadFailed {
                url: url.to_string(),
                reason: "连接被拒绝".to_string(),
            })
        }
    }

    fn test_config() -> Config {
        Config {
            backoff_base_ms: 1,
            ..Config::default()
        }
    }

    #[test]
    fn test_parse_table_with_quotes_and_types() {
        let text = "name,score,note\n\"Wang, Hao\",92,\"说了 \"\"好\"\"\"\nLi Lei,85.5,ok\n";
        let table = parse_table(text).unwrap();
        assert_eq!(table.headers, vec!["name", "score", "note"]);
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[0][0], "Wang, Hao");
        assert_eq!(table.rows[0][2], "说了 \"好\"");
        // score 列有 92 和 85.5，应推断为浮点
        assert_eq!(table.column_types[1], ColumnType::Float);
        assert_eq!(table.column_types[0], ColumnType::Text);
    }

    #[test]
    fn test_parse_table_tsv() {
        let text = "a\tb\n1\t2\n3\t4\n";
        let table = parse_table(text).unwrap();
        assert_eq!(table.headers, vec!["a", "b"]);
        assert_eq!(table.column_types, vec![ColumnType::Integer, ColumnType::Integer]);
    }

    #[test]
    fn test_parse_gzip_csv() {
        let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(b"x,y\n1,2\n").unwrap();
        let gz = encoder.finish().unwrap();

        let content = parse_content("http://a/data.csv.gz", &gz, FileKind::Gzip, 0, 3).unwrap();
        match content {
            FileContent::Table(table) => assert_eq!(table.rows.len(), 1),
            other => panic!("意外的内容: {:?}", other),
        }
    }

    #[test]
    fn test_tar_archive_entries() {
        let mut builder = tar::Builder::new(Vec::new());
        let data = b"k,v\na,1\n";
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_cksum();
        builder.append_data(&mut header, "inner/data.csv", &data[..]).unwrap();
        let tar_bytes = builder.into_inner().unwrap();

        let content = parse_content("http://a/pack.tar", &tar_bytes, FileKind::Tar, 0, 3).unwrap();
        match content {
            FileContent::Archive(entries) => {
                assert_eq!(entries.len(), 1);
                assert_eq!(entries[0].name, "inner/data.csv");
                assert!(matches!(entries[0].content, FileContent::Table(_)));
            }
            other => panic!("意外的内容: {:?}", other),
        }
    }

    #[test]
    fn test_archive_depth_exceeded() {
        let err = parse_content("http://a/pack.tar", b"", FileKind::Tar, 3, 3).unwrap_err();
        assert!(matches!(err, AgentError::ArchiveDepthExceeded { .. }));
    }

    #[test]
    fn test_malformed_json_is_unsupported_format() {
        let err = parse_content("http://a/d.json", b"{broken", FileKind::Json, 0, 3).unwrap_err();
        assert!(matches!(err, AgentError::UnsupportedFormat { .. }));
    }

    #[tokio::test]
    async fn test_resolve_caches_by_url() {
        let scratch = tempfile::TempDir::new().unwrap();
        let count = Arc::new(AtomicUsize::new(0));
        let fetcher = CountingFetcher {
            count: count.clone(),
            bytes: b"a,b\n1,2\n".to_vec(),
        };
        let resolver =
            FileResolver::new(Box::new(fetcher), scratch.path(), &test_config()).unwrap();

        let first = resolver
            .resolve("http://quiz.local/data.csv", Some(FileKind::Csv))
            .await
            .unwrap();
        let second = resolver
            .resolve("http://quiz.local/data.csv", Some(FileKind::Csv))
            .await
            .unwrap();

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(first.hash, second.hash);
    }

    #[tokio::test]
    async fn test_resolve_dedups_by_content_hash() {
        let scratch = tempfile::TempDir::new().unwrap();
        let count = Arc::new(AtomicUsize::new(0));
        let fetcher = CountingFetcher {
            count: count.clone(),
            bytes: b"a,b\n1,2\n".to_vec(),
        };
        let resolver =
            FileResolver::new(Box::new(fetcher), scratch.path(), &test_config()).unwrap();

        let first = resolver
            .resolve("http://quiz.local/data.csv", Some(FileKind::Csv))
            .await
            .unwrap();
        let second = resolver
            .resolve("http://quiz.local/copy.csv", Some(FileKind::Csv))
            .await
            .unwrap();

        // 两个 URL 都要取一次，但内容相同时复用同一份解析
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert_eq!(first.hash, second.hash);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_download_retries_then_fails() {
        let scratch = tempfile::TempDir::new().unwrap();
        let count = Arc::new(AtomicUsize::new(0));
        let fetcher = FailingFetcher { count: count.clone() };
        let resolver =
            FileResolver::new(Box::new(fetcher), scratch.path(), &test_config()).unwrap();

        let err = resolver
            .resolve("http://quiz.local/gone.csv", None)
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::DownloadFailed { .. }));
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }
}
