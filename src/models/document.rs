use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// 文档内容指纹 (SHA-256, 十六进制)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn of(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        Self(hex::encode(hasher.finalize()))
    }

    /// 从已存储的十六进制串恢复
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// 日志用前缀; 截断点不在字符边界时返回整串
    pub fn short(&self) -> &str {
        self.0.get(..12).unwrap_or(&self.0)
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// 文档来源标记 (邮箱、账单门户等)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceTag(pub String);

impl SourceTag {
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }
}

impl std::fmt::Display for SourceTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// 原始文档, 仅在抽取期间存在
#[derive(Debug, Clone)]
pub struct RawDocument {
    pub name: String,
    pub source: SourceTag,
    pub bytes: Vec<u8>,
    /// 同一封邮件里的其他附件
    pub siblings: Vec<RawDocument>,
}

impl RawDocument {
    pub fn new(name: impl Into<String>, source: SourceTag, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            source,
            bytes,
            siblings: Vec::new(),
        }
    }

    pub fn with_sibling(mut self, sibling: RawDocument) -> Self {
        self.siblings.push(sibling);
        self
    }

    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::of(&self.bytes)
    }

    /// 展开为物理文档列表: 自身在前, 附件按深度优先
    pub fn flatten(self) -> Vec<RawDocument> {
        let mut out = Vec::new();
        let mut stack = vec![self];
        while let Some(mut doc) = stack.pop() {
            let siblings = std::mem::take(&mut doc.siblings);
            out.push(doc);
            stack.extend(siblings.into_iter().rev());
        }
        out
    }

    pub fn reference(&self, fingerprint: Fingerprint) -> DocumentRef {
        DocumentRef {
            fingerprint,
            source: self.source.clone(),
            name: self.name.clone(),
        }
    }
}

/// 回指原始文档的来源信息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRef {
    pub fingerprint: Fingerprint,
    pub source: SourceTag,
    pub name: String,
}

impl std::fmt::Display for DocumentRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{} ({})", self.source, self.name, self.fingerprint.short())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(name: &str, bytes: &[u8]) -> RawDocument {
        RawDocument::new(name, SourceTag::new("gmail"), bytes.to_vec())
    }

    #[test]
    fn same_bytes_same_fingerprint_regardless_of_name() {
        let a = doc("invoice.pdf", b"%PDF-1.4 receipt");
        let b = RawDocument::new("copy.pdf", SourceTag::new("portal"), b"%PDF-1.4 receipt".to_vec());
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), doc("other.pdf", b"%PDF-1.4 other").fingerprint());
        assert_eq!(a.fingerprint().as_str().len(), 64);
    }

    #[test]
    fn short_prefix_handles_short_and_non_ascii_values() {
        let full = Fingerprint::of(b"receipt");
        assert_eq!(full.short(), &full.as_str()[..12]);
        assert_eq!(Fingerprint::from_hex("abc").short(), "abc");
        assert_eq!(Fingerprint::from_hex("aéééééé").short(), "aéééééé");
        assert_eq!(Fingerprint::from_hex("領収書のハッシュ値").short(), "領収書の");
    }

    #[test]
    fn flatten_keeps_parent_first_then_siblings_depth_first() {
        let nested = doc("c.pdf", b"c").with_sibling(doc("d.pdf", b"d"));
        let root = doc("a.pdf", b"a")
            .with_sibling(doc("b.pdf", b"b"))
            .with_sibling(nested);

        let names: Vec<String> = root.flatten().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["a.pdf", "b.pdf", "c.pdf", "d.pdf"]);
    }
}
