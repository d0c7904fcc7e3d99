use std::sync::Arc;

use globset::{GlobBuilder, GlobMatcher};

use crate::PubSubResult;

/// Скомпилированный glob-шаблон подписки.
///
/// Компилируется один раз при первой подписке на шаблон и
/// переиспользуется при каждой публикации.
#[derive(Debug, Clone)]
pub struct PatternMatcher {
    pattern: Arc<str>,
    matcher: GlobMatcher,
}

impl PatternMatcher {
    /// Компилирует шаблон с синтаксисом shell-glob (`*`, `?`, `[...]`, `{a,b}`).
    ///
    /// При `literal_separator = true` символы `*` и `?` не пересекают `/`.
    pub fn compile(
        pattern: &str,
        literal_separator: bool,
    ) -> PubSubResult<Self> {
        let glob = GlobBuilder::new(pattern)
            .literal_separator(literal_separator)
            .build()?;
        Ok(Self {
            pattern: Arc::from(pattern),
            matcher: glob.compile_matcher(),
        })
    }

    #[inline]
    pub fn is_match(
        &self,
        topic: &str,
    ) -> bool {
        self.matcher.is_match(topic)
    }

    pub fn pattern(&self) -> &Arc<str> {
        &self.pattern
    }
}
