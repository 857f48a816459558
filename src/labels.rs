// 该文件是 Luyan （路眼） 项目的一部分。
// src/labels.rs - 类别标签表
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::{path::Path, sync::Arc};

use thiserror::Error;
use tracing::{debug, info};

const METADATA_NAMES_KEY: &[u8] = b"names";
/// 在模型字节中搜索标签字典时最多向后查看的字节数
const METADATA_SCAN_WINDOW: usize = 64 * 1024;

#[derive(Error, Debug)]
pub enum LabelError {
  #[error("模型未携带标签元数据，且未提供标签文件")]
  Missing,
  #[error("标签文件读取错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("标签元数据格式错误: {0}")]
  Malformed(String),
  #[error("类别 {class_id} 超出标签表范围 (共 {len} 个标签)")]
  ResolutionGap { class_id: usize, len: usize },
}

/// 类别名称表，启动时加载一次，之后只读
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelTable {
  names: Arc<[String]>,
}

impl LabelTable {
  pub fn new<I, S>(names: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Self {
      names: names.into_iter().map(Into::into).collect(),
    }
  }

  /// 每行一个标签，忽略空行与首尾空白
  pub fn from_lines(text: &str) -> Self {
    Self::new(
      text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty()),
    )
  }

  pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, LabelError> {
    let path = path.as_ref();
    info!("加载标签文件: {}", path.display());
    let text = std::fs::read_to_string(path)?;
    let table = Self::from_lines(&text);
    debug!("标签数量: {}", table.len());
    Ok(table)
  }

  /// 解析形如 `{0: 'person', 1: 'car'}` 的标签字典
  pub fn from_metadata(text: &str) -> Result<Self, LabelError> {
    let body = text
      .trim()
      .strip_prefix('{')
      .and_then(|rest| rest.strip_suffix('}'))
      .ok_or_else(|| LabelError::Malformed("缺少花括号".to_string()))?;

    let mut entries = Vec::new();
    let mut chars = body.chars().peekable();
    loop {
      while chars.peek().is_some_and(|c| c.is_whitespace() || *c == ',') {
        chars.next();
      }
      if chars.peek().is_none() {
        break;
      }

      let mut index = String::new();
      while let Some(c) = chars.peek().copied().filter(|c| *c != ':') {
        index.push(c);
        chars.next();
      }
      if chars.next() != Some(':') {
        return Err(LabelError::Malformed(format!("条目 '{}' 缺少冒号", index.trim())));
      }
      let index: usize = index
        .trim()
        .trim_matches(|c| c == '\'' || c == '"')
        .parse()
        .map_err(|_| LabelError::Malformed(format!("无效的类别索引 '{}'", index.trim())))?;

      while chars.peek().is_some_and(|c| c.is_whitespace()) {
        chars.next();
      }
      let quote = match chars.next() {
        Some(q @ ('\'' | '"')) => q,
        _ => return Err(LabelError::Malformed(format!("类别 {} 的名称缺少引号", index))),
      };
      let mut name = String::new();
      loop {
        match chars.next() {
          Some(c) if c == quote => break,
          Some(c) => name.push(c),
          None => return Err(LabelError::Malformed(format!("类别 {} 的名称未闭合", index))),
        }
      }
      entries.push((index, name));
    }

    entries.sort_by_key(|(index, _)| *index);
    for (expected, (index, _)) in entries.iter().enumerate() {
      if *index != expected {
        return Err(LabelError::Malformed(format!(
          "类别索引不连续: 期望 {}, 实际 {}",
          expected, index
        )));
      }
    }
    Ok(Self::new(entries.into_iter().map(|(_, name)| name)))
  }

  /// 在模型文件中查找 Ultralytics 导出时写入的 `names` 元数据
  pub fn scan_embedded(model: &[u8]) -> Option<Self> {
    let mut from = 0;
    while let Some(offset) = find(&model[from..], METADATA_NAMES_KEY) {
      let key_end = from + offset + METADATA_NAMES_KEY.len();
      let window = &model[key_end..model.len().min(key_end + METADATA_SCAN_WINDOW)];
      if let Some(table) = dict_after_key(window) {
        debug!("从模型元数据中找到 {} 个标签", table.len());
        return Some(table);
      }
      from = key_end;
    }
    None
  }

  pub fn len(&self) -> usize {
    self.names.len()
  }

  pub fn is_empty(&self) -> bool {
    self.names.is_empty()
  }

  pub fn get(&self, class_id: usize) -> Option<&str> {
    self.names.get(class_id).map(String::as_str)
  }

  pub fn resolve(&self, class_id: usize) -> Result<&str, LabelError> {
    self.get(class_id).ok_or(LabelError::ResolutionGap {
      class_id,
      len: self.len(),
    })
  }

  /// 与 `resolve` 相同，但空名称替换为 `class_{id}`
  pub fn name_or_placeholder(&self, class_id: usize) -> Result<String, LabelError> {
    match self.resolve(class_id)? {
      "" => Ok(format!("class_{}", class_id)),
      name => Ok(name.to_string()),
    }
  }

  pub fn iter(&self) -> impl Iterator<Item = &str> {
    self.names.iter().map(String::as_str)
  }
}

/// 标签来源：先用模型内嵌元数据，其次是标签文件
#[derive(Debug, Clone, Default)]
pub struct LabelSource {
  pub embedded: Option<LabelTable>,
  pub file: Option<std::path::PathBuf>,
}

impl LabelSource {
  pub fn resolve(self) -> Result<LabelTable, LabelError> {
    if let Some(table) = self.embedded.filter(|table| !table.is_empty()) {
      info!("使用模型内嵌标签, 共 {} 个", table.len());
      return Ok(table);
    }
    match self.file {
      Some(path) => {
        let table = LabelTable::from_file(path)?;
        if table.is_empty() {
          return Err(LabelError::Missing);
        }
        Ok(table)
      }
      None => Err(LabelError::Missing),
    }
  }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
  haystack
    .windows(needle.len())
    .position(|window| window == needle)
}

fn dict_after_key(window: &[u8]) -> Option<LabelTable> {
  // 键与字典之间只允许出现少量的分隔字节
  let start = window.iter().take(16).position(|b| *b == b'{')?;
  let end = start + window[start..].iter().position(|b| *b == b'}')?;
  let text = std::str::from_utf8(&window[start..=end]).ok()?;
  LabelTable::from_metadata(text)
    .ok()
    .filter(|table| !table.is_empty())
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io::Write;

  #[test]
  fn lines_skip_blank_entries() {
    let table = LabelTable::from_lines("A-1\n\n  B-2 \r\nC-3\n");
    assert_eq!(table.len(), 3);
    assert_eq!(table.get(1), Some("B-2"));
    assert_eq!(table.get(3), None);
  }

  #[test]
  fn parses_metadata_dict() {
    let table = LabelTable::from_metadata("{1: 'car', 0: \"person\", 2: 'traffic light'}").unwrap();
    assert_eq!(
      table.iter().collect::<Vec<_>>(),
      vec!["person", "car", "traffic light"]
    );
  }

  #[test]
  fn rejects_gapped_metadata() {
    assert!(matches!(
      LabelTable::from_metadata("{0: 'a', 2: 'c'}"),
      Err(LabelError::Malformed(_))
    ));
    assert!(LabelTable::from_metadata("0: 'a'").is_err());
  }

  #[test]
  fn scans_embedded_names() {
    let mut model = vec![0u8, 1, 2, 3];
    model.extend_from_slice(b"stride\x12\x0232names\x12\x1c{0: 'stop', 1: 'yield'}\x00\x00");
    let table = LabelTable::scan_embedded(&model).unwrap();
    assert_eq!(table.get(0), Some("stop"));
    assert_eq!(table.get(1), Some("yield"));
    assert!(LabelTable::scan_embedded(b"no metadata here").is_none());
  }

  #[test]
  fn resolve_reports_gap() {
    let table = LabelTable::new(["a"]);
    assert_eq!(table.resolve(0).unwrap(), "a");
    assert_eq!(LabelTable::new([""]).name_or_placeholder(0).unwrap(), "class_0");
    assert!(matches!(
      table.resolve(4),
      Err(LabelError::ResolutionGap { class_id: 4, len: 1 })
    ));
  }

  #[test]
  fn source_prefers_embedded_then_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "from-file").unwrap();

    let source = LabelSource {
      embedded: Some(LabelTable::new(["embedded"])),
      file: Some(file.path().to_path_buf()),
    };
    assert_eq!(source.resolve().unwrap().get(0), Some("embedded"));

    let source = LabelSource {
      embedded: None,
      file: Some(file.path().to_path_buf()),
    };
    assert_eq!(source.resolve().unwrap().get(0), Some("from-file"));

    assert!(matches!(
      LabelSource::default().resolve(),
      Err(LabelError::Missing)
    ));
  }
}
