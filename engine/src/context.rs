use crate::error::{Result, SearchError};
use crate::index::{Index, SensitivitySetting};

/// One indexed sensitivity variant of an annotation. Every term of an
/// annotation is stored once per variant that the index declares.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Variant {
    /// Terms stored as-is.
    Sensitive,
    /// Case- and diacritics-folded terms.
    Insensitive,
    /// Case-folded, diacritics kept.
    CaseInsensitive,
    /// Diacritics-folded, case kept.
    DiacriticsInsensitive,
}

/// Fully resolved target for a term lookup: which field, which annotation,
/// which sensitivity variant.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct AnnotKey {
    pub field: String,
    pub annotation: String,
    pub variant: Variant,
}

/// The execution context a pattern subtree is compiled against: the field,
/// the annotation and the requested case/diacritics sensitivity.
///
/// Immutable; the scoped overrides produce a new context and leave the
/// receiver untouched, so sub-patterns can change target without affecting
/// their siblings.
#[derive(Clone)]
pub struct ExecContext<'a> {
    index: &'a dyn Index,
    field: String,
    annotation: String,
    case_sensitive: bool,
    diacritics_sensitive: bool,
}

impl<'a> ExecContext<'a> {
    /// Context for the index's main field and main annotation, searching
    /// insensitively (the index default).
    pub fn new(index: &'a dyn Index) -> Result<ExecContext<'a>> {
        let field = &index.metadata().main_field;
        ExecContext::for_field(index, field)
    }

    pub fn for_field(index: &'a dyn Index, field: &str) -> Result<ExecContext<'a>> {
        let fm = index
            .metadata()
            .field(field)
            .ok_or_else(|| SearchError::UnknownField(field.to_string()))?;
        Ok(ExecContext {
            index,
            field: field.to_string(),
            annotation: fm.main_annotation.clone(),
            case_sensitive: false,
            diacritics_sensitive: false,
        })
    }

    pub fn with_annotation(&self, annotation: &str) -> ExecContext<'a> {
        ExecContext {
            annotation: annotation.to_string(),
            ..self.clone()
        }
    }

    pub fn with_sensitivity(&self, case: bool, diacritics: bool) -> ExecContext<'a> {
        ExecContext {
            case_sensitive: case,
            diacritics_sensitive: diacritics,
            ..self.clone()
        }
    }

    pub fn index(&self) -> &'a dyn Index {
        self.index
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn annotation(&self) -> &str {
        &self.annotation
    }

    pub fn case_sensitive(&self) -> bool {
        self.case_sensitive
    }

    pub fn diacritics_sensitive(&self) -> bool {
        self.diacritics_sensitive
    }

    /// Do tokens of this field carry a trailing closing boundary token that
    /// negation must skip?
    pub fn always_has_closing_token(&self) -> bool {
        self.index
            .metadata()
            .field(&self.field)
            .map(|f| f.has_closing_token)
            .unwrap_or(false)
    }

    /// Pick the indexed variant to query. This is a priority order over what
    /// the index actually stores, not a flag lookup; the requested
    /// sensitivity degrades gracefully to the nearest stored variant.
    pub fn resolve_variant(&self) -> Result<Variant> {
        let fm = self
            .index
            .metadata()
            .field(&self.field)
            .ok_or_else(|| SearchError::UnknownField(self.field.to_string()))?;
        let am = fm
            .annotation(&self.annotation)
            .ok_or_else(|| SearchError::UnknownAnnotation(self.annotation.to_string()))?;
        let s = am.sensitivity;

        let order: &[Variant] = match (self.case_sensitive, self.diacritics_sensitive) {
            (false, false) => &[Variant::Insensitive, Variant::Sensitive],
            (true, true) => &[Variant::Sensitive, Variant::Insensitive],
            (true, false) => &[
                Variant::DiacriticsInsensitive,
                Variant::Sensitive,
                Variant::Insensitive,
            ],
            (false, true) => &[
                Variant::CaseInsensitive,
                Variant::Sensitive,
                Variant::Insensitive,
            ],
        };
        for &v in order {
            if s.has_variant(v) {
                return Ok(v);
            }
        }
        Err(SearchError::MalformedIndex(format!(
            "annotation {} of field {} has no usable sensitivity variant",
            self.annotation, self.field
        )))
    }

    /// The fully resolved lookup key for the current target.
    pub fn annot_key(&self) -> Result<AnnotKey> {
        Ok(AnnotKey {
            field: self.field.to_string(),
            annotation: self.annotation.to_string(),
            variant: self.resolve_variant()?,
        })
    }

    /// Fold a search string the same way the resolved variant's terms were
    /// folded at index time, so the lookup compares like with like.
    pub fn desensitize(&self, value: &str) -> Result<String> {
        Ok(desensitize(value, self.resolve_variant()?))
    }
}

pub fn desensitize(value: &str, variant: Variant) -> String {
    match variant {
        Variant::Sensitive => value.to_string(),
        Variant::Insensitive => fold_diacritics(&value.to_lowercase()),
        Variant::CaseInsensitive => value.to_lowercase(),
        Variant::DiacriticsInsensitive => fold_diacritics(value),
    }
}

/// Strip combining marks from the common Latin range. Covers what the test
/// corpora use; unknown characters pass through unchanged.
pub fn fold_diacritics(value: &str) -> String {
    value
        .chars()
        .map(|c| match c {
            'á' | 'à' | 'â' | 'ä' | 'ã' | 'å' | 'ā' => 'a',
            'é' | 'è' | 'ê' | 'ë' | 'ē' => 'e',
            'í' | 'ì' | 'î' | 'ï' | 'ī' => 'i',
            'ó' | 'ò' | 'ô' | 'ö' | 'õ' | 'ō' => 'o',
            'ú' | 'ù' | 'û' | 'ü' | 'ū' => 'u',
            'ý' | 'ÿ' => 'y',
            'ñ' => 'n',
            'ç' => 'c',
            'Á' | 'À' | 'Â' | 'Ä' | 'Ã' | 'Å' | 'Ā' => 'A',
            'É' | 'È' | 'Ê' | 'Ë' | 'Ē' => 'E',
            'Í' | 'Ì' | 'Î' | 'Ï' | 'Ī' => 'I',
            'Ó' | 'Ò' | 'Ô' | 'Ö' | 'Õ' | 'Ō' => 'O',
            'Ú' | 'Ù' | 'Û' | 'Ü' | 'Ū' => 'U',
            'Ý' => 'Y',
            'Ñ' => 'N',
            'Ç' => 'C',
            _ => c,
        })
        .collect()
}

impl SensitivitySetting {
    pub fn has_variant(self, v: Variant) -> bool {
        match v {
            Variant::Sensitive => self != SensitivitySetting::OnlyInsensitive,
            Variant::Insensitive => self != SensitivitySetting::OnlySensitive,
            Variant::CaseInsensitive | Variant::DiacriticsInsensitive => {
                self == SensitivitySetting::CaseAndDiacriticsSeparate
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::mem::MemIndexBuilder;

    #[test]
    fn insensitive_request_prefers_insensitive_variant() {
        let index = MemIndexBuilder::new().add_document("a b c").build();
        let ctx = ExecContext::new(&index).unwrap();
        assert_eq!(ctx.resolve_variant().unwrap(), Variant::Insensitive);
        assert_eq!(
            ctx.with_sensitivity(true, true).resolve_variant().unwrap(),
            Variant::Sensitive
        );
        // No split variants in the mem index: mixed requests degrade to
        // the sensitive variant first.
        assert_eq!(
            ctx.with_sensitivity(true, false).resolve_variant().unwrap(),
            Variant::Sensitive
        );
        assert_eq!(
            ctx.with_sensitivity(false, true).resolve_variant().unwrap(),
            Variant::Sensitive
        );
    }

    #[test]
    fn desensitize_folds_case_and_accents() {
        assert_eq!(desensitize("Über", Variant::Insensitive), "uber");
        assert_eq!(desensitize("Café", Variant::Insensitive), "cafe");
        assert_eq!(desensitize("Café", Variant::CaseInsensitive), "café");
        assert_eq!(desensitize("Café", Variant::DiacriticsInsensitive), "Cafe");
        assert_eq!(desensitize("Café", Variant::Sensitive), "Café");
    }

    #[test]
    fn overrides_leave_parent_untouched() {
        let index = MemIndexBuilder::new().add_document("a").build();
        let ctx = ExecContext::new(&index).unwrap();
        let child = ctx.with_annotation("lemma").with_sensitivity(true, true);
        assert_eq!(ctx.annotation(), "word");
        assert!(!ctx.case_sensitive());
        assert_eq!(child.annotation(), "lemma");
        assert!(child.case_sensitive());
    }
}
