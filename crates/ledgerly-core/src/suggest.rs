//! Pattern extraction, clustering and rule suggestions
//!
//! Words in a description are scored against lexicons of generic banking
//! vocabulary; the discriminant ones become rule patterns. Similar
//! descriptions are grouped with greedy Jaccard clustering so a single rule
//! can be proposed for a whole family of transactions.

use std::collections::{HashMap, HashSet};

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info};

use crate::config::ClusteringConfig;
use crate::db::{Database, TransactionFilter};
use crate::error::{Error, Result};
use crate::matcher::{specificity, validate_pattern_syntax, PatternMatcher};
use crate::models::{NewRule, PatternKind, Provenance, RuleSource, RuleStatus, Transaction};

// ========== Lexicons ==========

const TRANSACTION_TYPES: &[&str] = &[
    "PAGAMENTOS", "PAGAMENTO", "PAG", "PGTO", "TRANSF", "TRANSFERENCIA", "TRANSFERENCIAS",
    "DEPOSITO", "DEPOSITOS", "DEP", "SAQUE", "SAQUES", "CREDITO", "DEBITO", "DEB", "CRED", "PIX",
    "TED", "DOC", "BOLETO", "COMPRA", "COMPRAS", "VENDA", "VENDAS", "TARIFA", "TAR", "IOF",
    "JUROS", "ESTORNO", "ESTORNOS", "DEVOLUCAO", "ENVIADO", "RECEBIDO", "RECEB", "ENV", "ENVIO",
    "RECEBIMENTO", "LIQUIDACAO", "LIQ", "LANCAMENTO", "LANC", "FATURA", "FAT",
];

const LEGAL_FORMS: &[&str] = &[
    "LTDA", "SA", "ME", "MEI", "EIRELI", "EPP", "SS", "CIA", "INC", "SOCIEDADE", "EMPRESA",
    "EMPRESAS", "FILIAL", "MATRIZ", "HOLDING",
];

const BUSINESS_GENERIC: &[&str] = &[
    "COMERCIO", "COMERCIAL", "SERVICOS", "SERVICO", "REPRESENTACAO", "REPRESENTACOES",
    "INDUSTRIA", "INDUSTRIAL", "DISTRIBUIDORA", "DISTRIBUIDOR", "DISTRIBUICAO", "IMPORTACAO",
    "EXPORTACAO", "IMPORTADORA", "EXPORTADORA", "BRASIL", "BRASILEIRA", "INTERNACIONAL",
    "NACIONAL", "ATACADO", "VAREJO", "ATACADISTA", "VAREJISTA", "FORNECEDORES", "FORNECEDOR",
    "CLIENTES", "CLIENTE", "PARCEIRO", "PARCEIROS", "PRODUTOS", "PRODUTO", "MATERIAIS",
    "MATERIAL", "EQUIPAMENTOS", "EQUIPAMENTO", "CONSULTORIA", "ASSESSORIA", "ADMINISTRACAO",
    "GESTAO", "SOLUCOES", "TECNOLOGIA",
];

const BANK_PREFIXES: &[&str] = &[
    "SISPAG", "EST", "CARTEIRA", "COBRANCA", "COBRANCAS", "QUANT", "QUANTIDADE", "EVENTOS",
    "EVENTO", "OPERACAO", "OPERACOES", "CONTA", "CC", "CP", "POUPANCA", "CORRENTE",
    "INVESTIMENTO", "CDB", "RDB", "LCI", "LCA", "TESOURO",
];

const PREPOSITIONS: &[&str] = &[
    "DE", "DA", "DO", "DAS", "DOS", "A", "O", "AS", "OS", "E", "OU", "PARA", "PRA", "COM", "EM",
    "POR", "NO", "NA", "NOS", "NAS", "AO", "AOS", "UM", "UMA", "UNS", "UMAS", "PELO", "PELA",
    "PELOS", "PELAS",
];

const TEMPORAL: &[&str] = &[
    "JAN", "FEV", "MAR", "ABR", "MAI", "JUN", "JUL", "AGO", "SET", "OUT", "NOV", "DEZ", "JANEIRO",
    "FEVEREIRO", "MARCO", "ABRIL", "MAIO", "JUNHO", "JULHO", "AGOSTO", "SETEMBRO", "OUTUBRO",
    "NOVEMBRO", "DEZEMBRO", "MENSAL", "SEMANAL", "DIARIO", "ANUAL", "PARCELA", "PARCELAS", "REF",
];

/// Never acceptable as a pattern on their own
const EXTREMELY_GENERIC: &[&str] = &[
    "PAGAMENTO", "COMPRA", "VENDA", "CREDITO", "DEBITO", "TRANSFERENCIA", "OUTROS", "OUTRAS",
    "DIVERSOS", "DIVERSAS", "GERAL", "GERAIS",
];

const KNOWN_BANKS: &[&str] = &[
    "ITAU", "BRADESCO", "SANTANDER", "CAIXA", "CEF", "BB", "NUBANK", "INTER", "C6", "BTG",
    "SAFRA", "SICOOB", "SICREDI", "ORIGINAL", "PAN", "NEXT", "NEON", "PICPAY", "MERCADOPAGO",
    "PAGSEGURO", "STONE",
];

const KNOWN_SERVICES: &[&str] = &[
    "NETFLIX", "SPOTIFY", "AMAZON", "GOOGLE", "APPLE", "MICROSOFT", "UBER", "IFOOD",
    "MERCADOLIVRE", "MAGAZINELUIZA", "AMERICANAS", "SUBMARINO", "SHOPEE", "ALIEXPRESS", "CLARO",
    "VIVO", "TIM", "OI", "SKY", "NET", "GLOBO", "DEEZER", "HBO", "DISNEY", "LINKEDIN", "FACEBOOK",
    "INSTAGRAM", "WHATSAPP", "TELEGRAM", "ZOOM", "SLACK", "CEMIG", "COPASA", "SABESP", "LIGHT",
    "ENEL", "CPFL", "ENERGISA", "COELBA", "CELESC", "ELETROPAULO", "COMGAS", "NATURGY", "SANEPAR",
    "CORSAN",
];

fn in_lexicon(lexicon: &[&str], word: &str) -> bool {
    lexicon.contains(&word)
}

/// Whether a (uppercased) word belongs to any generic lexicon
pub fn is_generic_word(word: &str) -> bool {
    let upper = word.to_uppercase();
    [
        TRANSACTION_TYPES,
        LEGAL_FORMS,
        BUSINESS_GENERIC,
        BANK_PREFIXES,
        PREPOSITIONS,
        TEMPORAL,
        EXTREMELY_GENERIC,
    ]
    .iter()
    .any(|lexicon| in_lexicon(lexicon, &upper))
}

fn known_entity_kind(word: &str) -> Option<EntityKind> {
    if in_lexicon(KNOWN_BANKS, word) {
        Some(EntityKind::Bank)
    } else if in_lexicon(KNOWN_SERVICES, word) {
        Some(EntityKind::Service)
    } else {
        None
    }
}

// ========== Word scoring ==========

/// Role of a word in a description
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WordClass {
    Entity,
    Action,
    Generic,
    Preposition,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WordScore {
    pub word: String,
    /// 0-1, higher is more distinctive
    pub score: f64,
    pub class: WordClass,
    pub discriminant: bool,
}

/// Score a word's relevance within its description
pub fn score_word(word: &str, context: &[String]) -> WordScore {
    let upper = word.to_uppercase();
    let fixed = |score: f64, class: WordClass, discriminant: bool| WordScore {
        word: word.to_string(),
        score,
        class,
        discriminant,
    };

    if in_lexicon(PREPOSITIONS, &upper) {
        return fixed(0.05, WordClass::Preposition, false);
    }
    if known_entity_kind(&upper).is_some() {
        return fixed(0.95, WordClass::Entity, true);
    }
    if in_lexicon(EXTREMELY_GENERIC, &upper) {
        return fixed(0.1, WordClass::Generic, false);
    }
    if in_lexicon(TRANSACTION_TYPES, &upper) {
        return fixed(0.25, WordClass::Action, false);
    }
    if in_lexicon(LEGAL_FORMS, &upper) {
        return fixed(0.15, WordClass::Generic, false);
    }
    if in_lexicon(BUSINESS_GENERIC, &upper) {
        return fixed(0.3, WordClass::Generic, false);
    }
    if in_lexicon(BANK_PREFIXES, &upper) {
        return fixed(0.2, WordClass::Generic, false);
    }
    if in_lexicon(TEMPORAL, &upper) {
        return fixed(0.1, WordClass::Generic, false);
    }

    let len = upper.chars().count();
    let mut score: f64 = 0.6;
    if len >= 6 {
        score += 0.15;
    } else if len >= 4 {
        score += 0.1;
    } else if len <= 2 {
        score -= 0.2;
    }
    if context.iter().filter(|w| w.to_uppercase() == upper).count() == 1 {
        score += 0.1;
    }
    // Looks like a proper name
    if (4..=15).contains(&len) {
        score += 0.1;
    }

    let score = score.clamp(0.0, 1.0);
    fixed(score, WordClass::Entity, score >= 0.7)
}

// ========== Pattern extraction ==========

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntityKind {
    Bank,
    Service,
    Company,
    Unknown,
}

#[derive(Debug, Clone)]
struct Entity {
    name: String,
    kind: EntityKind,
    confidence: f64,
}

/// How a candidate pattern was derived
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternStrategy {
    /// A known service or bank name
    KnownEntity,
    /// Company name found before a legal form
    CompanyEntity,
    /// Transaction type followed by the main entity
    PrefixEntity,
    /// First and last discriminant words
    MultiKeyword,
    /// The only discriminant word
    SingleKeyword,
    Fallback,
}

impl PatternStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::KnownEntity => "known_entity",
            Self::CompanyEntity => "company_entity",
            Self::PrefixEntity => "prefix_entity",
            Self::MultiKeyword => "multi_keyword",
            Self::SingleKeyword => "single_keyword",
            Self::Fallback => "fallback",
        }
    }
}

/// One candidate rule pattern
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PatternCandidate {
    pub pattern: String,
    pub kind: PatternKind,
    pub strategy: PatternStrategy,
    pub estimated_precision: f64,
    /// 0 = very specific, 1 = very generic
    pub genericity: f64,
}

impl PatternCandidate {
    fn contains(pattern: String, strategy: PatternStrategy, precision: f64, genericity: f64) -> Self {
        Self {
            pattern,
            kind: PatternKind::Contains,
            strategy,
            estimated_precision: precision,
            genericity,
        }
    }

    fn wildcard(first: &str, last: &str, strategy: PatternStrategy, precision: f64, genericity: f64) -> Self {
        Self {
            pattern: format!("*{}*{}*", first, last),
            kind: PatternKind::Wildcard,
            strategy,
            estimated_precision: precision,
            genericity,
        }
    }
}

/// Result of extracting a pattern from one description
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PatternExtraction {
    /// Best candidate that passes validation, if any
    pub best: Option<PatternCandidate>,
    /// Top candidates in rank order (the best one included)
    pub alternatives: Vec<PatternCandidate>,
    /// Numbers stripped from the description
    pub removed: Vec<String>,
}

/// Uppercase, drop digits and punctuation, collapse whitespace
pub fn normalize_for_patterns(description: &str) -> String {
    description
        .to_uppercase()
        .chars()
        .map(|c| if c.is_alphabetic() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Clustering tokens: normalized words longer than two characters
pub fn tokenize(description: &str) -> Vec<String> {
    normalize_for_patterns(description)
        .split(' ')
        .filter(|w| w.chars().count() > 2)
        .map(str::to_string)
        .collect()
}

fn extract_entities(words: &[String]) -> Vec<Entity> {
    let mut entities: Vec<Entity> = Vec::new();
    let seen = |entities: &[Entity], word: &str| entities.iter().any(|e| e.name == word);

    for word in words {
        if let Some(kind) = known_entity_kind(word) {
            if !seen(&entities, word) {
                entities.push(Entity {
                    name: word.clone(),
                    kind,
                    confidence: 0.95,
                });
            }
        }
    }

    // Company names sit right before a legal form
    for (idx, word) in words.iter().enumerate().skip(1) {
        if !in_lexicon(LEGAL_FORMS, word) {
            continue;
        }
        let mut company: Vec<&String> = Vec::new();
        for candidate in words[..idx].iter().rev().take(4) {
            if in_lexicon(BUSINESS_GENERIC, candidate) {
                break;
            }
            if !is_generic_word(candidate) && candidate.chars().count() > 2 {
                company.insert(0, candidate);
            }
        }
        let chosen = company
            .iter()
            .find(|w| score_word(w, words).discriminant)
            .or_else(|| company.first());
        if let Some(name) = chosen {
            if !seen(&entities, name) {
                entities.push(Entity {
                    name: (*name).clone(),
                    kind: EntityKind::Company,
                    confidence: 0.85,
                });
            }
        }
    }

    // PIX ENVIADO <ENTITY>
    for (idx, word) in words.iter().enumerate() {
        if !in_lexicon(TRANSACTION_TYPES, word) {
            continue;
        }
        if let Some(next) = words
            .iter()
            .skip(idx + 1)
            .take(3)
            .find(|w| score_word(w, words).discriminant)
        {
            if !seen(&entities, next) {
                entities.push(Entity {
                    name: next.clone(),
                    kind: EntityKind::Unknown,
                    confidence: 0.75,
                });
            }
        }
    }

    for word in words {
        let score = score_word(word, words);
        if score.discriminant && !seen(&entities, word) {
            entities.push(Entity {
                name: word.clone(),
                kind: EntityKind::Unknown,
                confidence: score.score,
            });
        }
    }

    entities.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    entities
}

fn candidate_patterns(words: &[String]) -> Vec<PatternCandidate> {
    let entities = extract_entities(words);
    let discriminants: Vec<&String> = words
        .iter()
        .filter(|w| score_word(w, words).discriminant)
        .collect();
    let transaction_type = words.iter().find(|w| in_lexicon(TRANSACTION_TYPES, w));

    let mut candidates = Vec::new();

    if let Some(known) = entities
        .iter()
        .find(|e| matches!(e.kind, EntityKind::Service | EntityKind::Bank))
    {
        candidates.push(PatternCandidate::contains(
            known.name.clone(),
            PatternStrategy::KnownEntity,
            0.95,
            0.2,
        ));
    }

    if let Some(company) = entities.iter().find(|e| e.kind == EntityKind::Company) {
        candidates.push(PatternCandidate::contains(
            company.name.clone(),
            PatternStrategy::CompanyEntity,
            0.85,
            0.25,
        ));
    }

    if let (Some(tx_type), Some(main)) = (transaction_type, entities.first()) {
        candidates.push(PatternCandidate::wildcard(
            tx_type,
            &main.name,
            PatternStrategy::PrefixEntity,
            0.8,
            0.35,
        ));
    }

    if let (Some(first), Some(last)) = (discriminants.first(), discriminants.last()) {
        if discriminants.len() >= 2 && first != last {
            candidates.push(PatternCandidate::wildcard(
                first,
                last,
                PatternStrategy::MultiKeyword,
                0.75,
                0.4,
            ));
        }
    }

    if discriminants.len() == 1 && discriminants[0].chars().count() >= 4 {
        candidates.push(PatternCandidate::contains(
            discriminants[0].clone(),
            PatternStrategy::SingleKeyword,
            0.7,
            0.3,
        ));
    }

    if candidates.is_empty() && !discriminants.is_empty() {
        let joined = discriminants
            .iter()
            .take(3)
            .map(|w| w.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        if joined.chars().count() >= 4 {
            candidates.push(PatternCandidate::contains(joined, PatternStrategy::Fallback, 0.65, 0.5));
        }
    }

    candidates.sort_by(|a, b| {
        b.estimated_precision
            .total_cmp(&a.estimated_precision)
            .then(a.genericity.total_cmp(&b.genericity))
    });
    candidates
}

fn is_selectable(candidate: &PatternCandidate) -> bool {
    let len = candidate.pattern.chars().count();
    (3..=50).contains(&len)
        && candidate.estimated_precision >= 0.65
        && candidate.genericity <= 0.6
        && validate_pattern(&candidate.pattern).is_ok()
}

/// Derive candidate rule patterns from a description
pub fn extract_pattern(description: &str) -> PatternExtraction {
    let removed: Vec<String> = description
        .split(|c: char| !c.is_ascii_digit())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();

    let words: Vec<String> = normalize_for_patterns(description)
        .split(' ')
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect();

    let mut alternatives = candidate_patterns(&words);
    alternatives.truncate(5);

    let mut best = alternatives.iter().find(|c| is_selectable(c)).cloned();

    if best.is_none() {
        let fallback = words
            .iter()
            .filter(|w| !is_generic_word(w) && w.chars().count() > 2)
            .take(3)
            .cloned()
            .collect::<Vec<_>>()
            .join(" ");
        if validate_pattern(&fallback).is_ok() {
            best = Some(PatternCandidate::contains(fallback, PatternStrategy::Fallback, 0.6, 0.5));
        }
    }

    PatternExtraction {
        best,
        alternatives,
        removed,
    }
}

/// Check a pattern is distinctive enough to become a rule
pub fn validate_pattern(pattern: &str) -> Result<()> {
    let clean = pattern.replace(['*', '?', '|'], " ");
    let clean = clean.trim();

    if clean.chars().count() < 3 {
        return Err(Error::InvalidData(format!(
            "Pattern '{}' is too short (minimum 3 characters)",
            pattern
        )));
    }

    let words: Vec<String> = clean
        .split_whitespace()
        .filter(|w| w.chars().count() > 2)
        .map(str::to_uppercase)
        .collect();
    if words.is_empty() {
        return Err(Error::InvalidData(format!(
            "Pattern '{}' has no significant word",
            pattern
        )));
    }
    if words.iter().all(|w| is_generic_word(w)) {
        return Err(Error::InvalidData(format!(
            "Pattern '{}' only contains generic words",
            pattern
        )));
    }
    if words.len() == 1 && in_lexicon(EXTREMELY_GENERIC, &words[0]) {
        return Err(Error::InvalidData(format!("Pattern '{}' is too generic", pattern)));
    }
    Ok(())
}

/// Tokens shared by at least `min_frequency` (0-1) of the descriptions, generic words removed
pub fn common_keywords(descriptions: &[String], min_frequency: f64) -> Vec<String> {
    if descriptions.is_empty() {
        return Vec::new();
    }

    let mut counts: HashMap<String, usize> = HashMap::new();
    for description in descriptions {
        let unique: HashSet<String> = tokenize(description).into_iter().collect();
        for token in unique {
            *counts.entry(token).or_insert(0) += 1;
        }
    }

    let needed = (min_frequency.clamp(0.0, 1.0) * descriptions.len() as f64).ceil().max(1.0) as usize;
    let mut keywords: Vec<(String, usize)> = counts
        .into_iter()
        .filter(|(token, count)| *count >= needed && !is_generic_word(token))
        .collect();
    keywords.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    keywords.into_iter().map(|(token, _)| token).collect()
}

// ========== Clustering ==========

fn token_jaccard(a: &[String], b: &[String]) -> f64 {
    let a: HashSet<&String> = a.iter().collect();
    let b: HashSet<&String> = b.iter().collect();
    let union = a.union(&b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(&b).count() as f64 / union as f64
}

/// A transaction taking part in clustering
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterMember {
    pub transaction_id: i64,
    pub description: String,
    /// Category (or review hint) the transaction currently carries
    pub category_id: Option<i64>,
}

impl ClusterMember {
    fn from_transaction(tx: &Transaction) -> Self {
        Self {
            transaction_id: tx.id,
            description: tx.match_text().to_string(),
            category_id: tx.category_id.or(tx.suggested_category_id),
        }
    }
}

/// A group of similar descriptions
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Cluster {
    /// Normalized description of the first member
    pub centroid: String,
    pub common_tokens: Vec<String>,
    pub members: Vec<ClusterMember>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterPattern {
    pub pattern: String,
    pub kind: PatternKind,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterQuality {
    /// How alike the members are
    pub cohesion: f64,
    /// How distinct the cluster is from the rest
    pub separation: f64,
    pub ready: bool,
    pub suggested_pattern: Option<ClusterPattern>,
}

impl Cluster {
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    fn discriminant_tokens(&self) -> Vec<&String> {
        self.common_tokens
            .iter()
            .filter(|t| score_word(t, &self.common_tokens).discriminant)
            .collect()
    }

    /// Rule pattern shared by the members
    pub fn pattern(&self) -> ClusterPattern {
        if self.common_tokens.is_empty() {
            let best = extract_pattern(&self.centroid).best;
            return match best {
                Some(c) => ClusterPattern {
                    pattern: c.pattern,
                    kind: c.kind,
                    confidence: 0.6,
                },
                None => ClusterPattern {
                    pattern: self.centroid.clone(),
                    kind: PatternKind::Contains,
                    confidence: 0.6,
                },
            };
        }

        let discriminants = self.discriminant_tokens();
        match discriminants.as_slice() {
            [] => ClusterPattern {
                pattern: self
                    .common_tokens
                    .iter()
                    .take(3)
                    .cloned()
                    .collect::<Vec<_>>()
                    .join(" "),
                kind: PatternKind::Contains,
                confidence: 0.5,
            },
            [only] => ClusterPattern {
                pattern: (*only).clone(),
                kind: PatternKind::Contains,
                confidence: 0.7,
            },
            [first, .., last] => ClusterPattern {
                pattern: format!("*{}*{}*", first, last),
                kind: PatternKind::Wildcard,
                confidence: 0.75,
            },
        }
    }

    pub fn quality(&self, min_cluster_size: usize) -> ClusterQuality {
        let size = self.len() as f64;
        let min_size = min_cluster_size.max(1) as f64;
        let cohesion = (self.common_tokens.len() as f64 / 5.0).min(1.0) * (size / min_size).min(1.0);
        let separation = if self.discriminant_tokens().is_empty() { 0.4 } else { 0.8 };
        let ready = self.len() >= min_cluster_size && cohesion >= 0.5 && separation >= 0.5;

        ClusterQuality {
            cohesion,
            separation,
            ready,
            suggested_pattern: ready.then(|| self.pattern()),
        }
    }

    /// Most frequent category among the members, with its count
    pub fn dominant_category(&self) -> Option<(i64, usize)> {
        let mut counts: HashMap<i64, usize> = HashMap::new();
        for id in self.members.iter().filter_map(|m| m.category_id) {
            *counts.entry(id).or_insert(0) += 1;
        }
        counts
            .into_iter()
            .max_by(|a, b| a.1.cmp(&b.1).then(b.0.cmp(&a.0)))
    }
}

/// Greedy Jaccard clustering in input order
pub fn cluster_descriptions(members: Vec<ClusterMember>, config: &ClusteringConfig) -> Vec<Cluster> {
    let mut clusters: Vec<Cluster> = Vec::new();

    for member in members {
        let tokens = tokenize(&member.description);
        if tokens.is_empty() {
            continue;
        }

        let target = clusters.iter_mut().find(|c| {
            c.members.len() < config.max_cluster_size
                && token_jaccard(&tokens, &c.common_tokens) >= config.similarity_threshold
        });

        match target {
            Some(cluster) => {
                let shared: Vec<String> = cluster
                    .common_tokens
                    .iter()
                    .filter(|t| tokens.contains(t))
                    .cloned()
                    .collect();
                if !shared.is_empty() {
                    cluster.common_tokens = shared;
                }
                cluster.members.push(member);
            }
            None => {
                let mut unique = Vec::with_capacity(tokens.len());
                for token in tokens {
                    if !unique.contains(&token) {
                        unique.push(token);
                    }
                }
                clusters.push(Cluster {
                    centroid: normalize_for_patterns(&member.description),
                    common_tokens: unique,
                    members: vec![member],
                });
            }
        }
    }

    clusters
}

// ========== Suggestor ==========

/// A proposed rule backed by a cluster of transactions
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleSuggestion {
    pub pattern: String,
    pub kind: PatternKind,
    pub category_id: Option<i64>,
    pub confidence: f64,
    pub transaction_count: usize,
    pub transaction_ids: Vec<i64>,
    pub examples: Vec<String>,
    pub cohesion: f64,
    pub separation: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryCount {
    pub category_id: Option<i64>,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PreviewMatch {
    pub transaction_id: i64,
    pub description: String,
    pub amount: f64,
    pub category_id: Option<i64>,
}

/// What a pattern would match if it became a rule
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PatternPreview {
    pub pattern: String,
    pub kind: PatternKind,
    pub specificity: f64,
    pub scanned: usize,
    pub total_matches: usize,
    /// Current categories of the matched transactions, largest first
    pub by_category: Vec<CategoryCount>,
    pub sample: Vec<PreviewMatch>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimilarTransaction {
    pub transaction_id: i64,
    pub description: String,
    pub similarity: f64,
    pub category_id: Option<i64>,
}

/// Outcome of turning ready clusters into rules
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ClusterProcessing {
    pub clusters_processed: usize,
    pub rules_created: usize,
}

const SCAN_LIMIT: i64 = 5000;
const SIMILAR_SCAN_LIMIT: i64 = 500;
const CLUSTER_RULE_CONFIDENCE: f64 = 0.8;

pub struct PatternSuggestor {
    db: Database,
    config: ClusteringConfig,
    matcher: PatternMatcher,
}

impl PatternSuggestor {
    pub fn new(db: Database, config: &ClusteringConfig) -> Self {
        Self {
            db,
            config: config.clone(),
            matcher: PatternMatcher::new(),
        }
    }

    fn recent_transactions(&self, tenant_id: &str, limit: i64) -> Result<Vec<Transaction>> {
        let mut filter = TransactionFilter::new(tenant_id);
        filter.since = Some(Utc::now().date_naive() - chrono::Duration::days(self.config.lookback_days));
        filter.limit = limit;
        self.db.list_transactions(&filter)
    }

    /// Rules proposed for unclassified and review transactions
    pub fn suggest_rules(&self, tenant_id: &str) -> Result<Vec<RuleSuggestion>> {
        let members: Vec<ClusterMember> = self
            .recent_transactions(tenant_id, SCAN_LIMIT)?
            .iter()
            .filter(|tx| !tx.manually_categorized && (tx.needs_review || tx.category_id.is_none()))
            .map(ClusterMember::from_transaction)
            .collect();

        let mut suggestions = Vec::new();
        for cluster in cluster_descriptions(members, &self.config) {
            let quality = cluster.quality(self.config.min_cluster_size);
            let Some(pattern) = quality.suggested_pattern else {
                continue;
            };
            if validate_pattern(&pattern.pattern).is_err()
                || self
                    .db
                    .find_rule_by_pattern(tenant_id, &pattern.pattern, pattern.kind)?
                    .is_some()
            {
                continue;
            }

            suggestions.push(RuleSuggestion {
                pattern: pattern.pattern,
                kind: pattern.kind,
                category_id: cluster.dominant_category().map(|(id, _)| id),
                confidence: pattern.confidence,
                transaction_count: cluster.len(),
                transaction_ids: cluster.members.iter().map(|m| m.transaction_id).collect(),
                examples: cluster
                    .members
                    .iter()
                    .take(3)
                    .map(|m| m.description.clone())
                    .collect(),
                cohesion: quality.cohesion,
                separation: quality.separation,
            });
        }

        suggestions.sort_by(|a, b| b.transaction_count.cmp(&a.transaction_count));
        debug!(tenant = tenant_id, count = suggestions.len(), "Rule suggestions computed");
        Ok(suggestions)
    }

    /// Blast radius of a pattern over the tenant's transactions
    pub fn preview_pattern(
        &self,
        tenant_id: &str,
        pattern: &str,
        kind: PatternKind,
        limit: usize,
    ) -> Result<PatternPreview> {
        validate_pattern_syntax(pattern, kind)?;

        let mut filter = TransactionFilter::new(tenant_id);
        filter.limit = SCAN_LIMIT;
        let transactions = self.db.list_transactions(&filter)?;

        let matched: Vec<&Transaction> = transactions
            .iter()
            .filter(|tx| self.matcher.evaluate(pattern, kind, tx.match_text()).matched)
            .collect();

        let mut counts: HashMap<Option<i64>, usize> = HashMap::new();
        for tx in &matched {
            *counts.entry(tx.category_id).or_insert(0) += 1;
        }
        let mut by_category: Vec<CategoryCount> = counts
            .into_iter()
            .map(|(category_id, count)| CategoryCount { category_id, count })
            .collect();
        by_category.sort_by(|a, b| b.count.cmp(&a.count).then(a.category_id.cmp(&b.category_id)));

        Ok(PatternPreview {
            pattern: pattern.to_string(),
            kind,
            specificity: specificity(pattern, kind),
            scanned: transactions.len(),
            total_matches: matched.len(),
            by_category,
            sample: matched
                .iter()
                .take(limit)
                .map(|tx| PreviewMatch {
                    transaction_id: tx.id,
                    description: tx.description.clone(),
                    amount: tx.amount,
                    category_id: tx.category_id,
                })
                .collect(),
        })
    }

    /// Recent transactions whose tokens overlap `description`, most similar first
    pub fn find_similar_transactions(
        &self,
        tenant_id: &str,
        description: &str,
        limit: usize,
    ) -> Result<Vec<SimilarTransaction>> {
        let tokens = tokenize(description);
        if tokens.is_empty() {
            return Ok(Vec::new());
        }

        let mut similar: Vec<SimilarTransaction> = self
            .recent_transactions(tenant_id, SIMILAR_SCAN_LIMIT)?
            .into_iter()
            .filter_map(|tx| {
                let similarity = token_jaccard(&tokens, &tokenize(tx.match_text()));
                (similarity >= self.config.similarity_threshold).then(|| SimilarTransaction {
                    transaction_id: tx.id,
                    description: tx.description.clone(),
                    similarity,
                    category_id: tx.category_id,
                })
            })
            .collect();

        similar.sort_by(|a, b| {
            b.similarity
                .total_cmp(&a.similarity)
                .then(a.transaction_id.cmp(&b.transaction_id))
        });
        similar.truncate(limit);
        Ok(similar)
    }

    /// Create monitoring rules from ready clusters of classified, rule-less transactions
    ///
    /// Clusters are formed per category so each rule has an unambiguous target.
    pub fn process_clusters(&self, tenant_id: &str) -> Result<ClusterProcessing> {
        let mut by_category: HashMap<i64, Vec<ClusterMember>> = HashMap::new();
        for tx in self.recent_transactions(tenant_id, SCAN_LIMIT)? {
            let Some(category_id) = tx.category_id else {
                continue;
            };
            if tx.needs_review || tx.provenance == Some(Provenance::Rule) {
                continue;
            }
            by_category
                .entry(category_id)
                .or_default()
                .push(ClusterMember::from_transaction(&tx));
        }

        let mut categories: Vec<i64> = by_category.keys().copied().collect();
        categories.sort_unstable();

        let mut outcome = ClusterProcessing::default();
        for category_id in categories {
            let members = by_category.remove(&category_id).unwrap_or_default();
            for cluster in cluster_descriptions(members, &self.config) {
                let Some(pattern) = cluster.quality(self.config.min_cluster_size).suggested_pattern else {
                    continue;
                };
                outcome.clusters_processed += 1;

                if validate_pattern(&pattern.pattern).is_err()
                    || self
                        .db
                        .find_rule_by_pattern(tenant_id, &pattern.pattern, pattern.kind)?
                        .is_some()
                {
                    continue;
                }

                let rule = NewRule::new(tenant_id, &pattern.pattern, pattern.kind, category_id)
                    .with_confidence(CLUSTER_RULE_CONFIDENCE)
                    .with_status(RuleStatus::Monitoring)
                    .with_source(RuleSource::Cluster);
                let id = self.db.create_rule(&rule)?;
                outcome.rules_created += 1;
                info!(
                    rule_id = id,
                    pattern = %pattern.pattern,
                    size = cluster.len(),
                    "Created rule from transaction cluster"
                );
            }
        }

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{LedgerType, NewCategory, NewTransaction};

    fn words(s: &str) -> Vec<String> {
        normalize_for_patterns(s)
            .split(' ')
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn test_score_word_lexicons() {
        let ctx = words("PIX ENVIADO PADARIA CENTRAL");
        assert_eq!(score_word("DE", &ctx).class, WordClass::Preposition);
        assert!(score_word("NETFLIX", &ctx).discriminant);
        assert_eq!(score_word("PIX", &ctx).class, WordClass::Action);
        assert!(!score_word("LTDA", &ctx).discriminant);

        let padaria = score_word("PADARIA", &ctx);
        assert!(padaria.discriminant);
        assert!((padaria.score - 0.95).abs() < 1e-9);
    }

    #[test]
    fn test_extract_known_entity_first() {
        let extraction = extract_pattern("PAG*NETFLIX.COM 0123 SAO PAULO");
        let best = extraction.best.unwrap();
        assert_eq!(best.pattern, "NETFLIX");
        assert_eq!(best.kind, PatternKind::Contains);
        assert_eq!(best.strategy, PatternStrategy::KnownEntity);
        assert_eq!(extraction.removed, vec!["0123"]);
    }

    #[test]
    fn test_extract_prefix_entity_wildcard() {
        let best = extract_pattern("PAG 99POP VIAGEM").best.unwrap();
        assert_eq!(best.pattern, "*PAG*VIAGEM*");
        assert_eq!(best.kind, PatternKind::Wildcard);
        assert_eq!(best.strategy, PatternStrategy::PrefixEntity);
    }

    #[test]
    fn test_extract_company_before_legal_form() {
        let extraction = extract_pattern("SISPAG CRIATIVA EMBALAGENS LTDA");
        assert!(extraction
            .alternatives
            .iter()
            .any(|c| c.strategy == PatternStrategy::CompanyEntity && c.pattern == "CRIATIVA"));
    }

    #[test]
    fn test_generic_description_has_no_pattern() {
        let extraction = extract_pattern("PAGAMENTO DIVERSOS 123");
        assert!(extraction.best.is_none());
    }

    #[test]
    fn test_validate_pattern() {
        assert!(validate_pattern("UB").is_err());
        assert!(validate_pattern("PIX TED").is_err());
        assert!(validate_pattern("PAGAMENTO").is_err());
        assert!(validate_pattern("*PAG*VIAGEM*").is_ok());
        assert!(validate_pattern("NETFLIX").is_ok());
    }

    #[test]
    fn test_common_keywords() {
        let descriptions = vec![
            "PIX ENVIADO PADARIA CENTRAL 01".to_string(),
            "PIX ENVIADO PADARIA CENTRAL 02".to_string(),
            "PIX ENVIADO PADARIA NOVA".to_string(),
        ];
        assert_eq!(common_keywords(&descriptions, 1.0), vec!["PADARIA"]);
        assert_eq!(common_keywords(&descriptions, 0.6), vec!["PADARIA", "CENTRAL"]);
        assert!(common_keywords(&[], 0.5).is_empty());
    }

    fn member(id: i64, description: &str, category_id: Option<i64>) -> ClusterMember {
        ClusterMember {
            transaction_id: id,
            description: description.to_string(),
            category_id,
        }
    }

    #[test]
    fn test_cluster_descriptions_groups_similar() {
        let members = vec![
            member(1, "PIX ENVIADO PADARIA CENTRAL 01", Some(7)),
            member(2, "PIX ENVIADO PADARIA CENTRAL 02", Some(7)),
            member(3, "NETFLIX ASSINATURA", None),
            member(4, "PIX ENVIADO PADARIA CENTRAL 03", Some(8)),
            member(5, "PIX ENVIADO PADARIA CENTRAL", Some(7)),
        ];
        let clusters = cluster_descriptions(members, &ClusteringConfig::default());
        assert_eq!(clusters.len(), 2);
        assert_eq!(clusters[0].len(), 4);
        assert_eq!(clusters[0].common_tokens, vec!["PIX", "ENVIADO", "PADARIA", "CENTRAL"]);
        assert_eq!(clusters[0].dominant_category(), Some((7, 3)));

        let quality = clusters[0].quality(3);
        assert!(quality.ready);
        assert!((quality.cohesion - 0.8).abs() < 1e-9);
        let pattern = quality.suggested_pattern.unwrap();
        assert_eq!(pattern.pattern, "*PADARIA*CENTRAL*");
        assert_eq!(pattern.kind, PatternKind::Wildcard);
        assert!((pattern.confidence - 0.75).abs() < 1e-9);

        assert!(!clusters[1].quality(3).ready);
    }

    #[test]
    fn test_cluster_respects_max_size() {
        let config = ClusteringConfig {
            max_cluster_size: 2,
            ..ClusteringConfig::default()
        };
        let members = (0..5)
            .map(|i| member(i, "TARIFA PACOTE SERVICOS ITAU", None))
            .collect();
        let clusters = cluster_descriptions(members, &config);
        assert_eq!(clusters.len(), 3);
        assert!(clusters.iter().all(|c| c.len() <= 2));
    }

    #[test]
    fn test_cluster_pattern_without_discriminants() {
        let cluster = Cluster {
            centroid: "PIX ENVIADO".into(),
            common_tokens: vec!["PIX".into(), "ENVIADO".into()],
            members: vec![],
        };
        let pattern = cluster.pattern();
        assert_eq!(pattern.pattern, "PIX ENVIADO");
        assert!((pattern.confidence - 0.5).abs() < 1e-9);
        assert!((cluster.quality(3).separation - 0.4).abs() < 1e-9);
    }

    fn seeded() -> (Database, i64) {
        let db = Database::in_memory().unwrap();
        let cat = db
            .create_category(&NewCategory::new("default", "Alimentação", LedgerType::VariableCost))
            .unwrap();
        let today = Utc::now().date_naive();
        for i in 0..4 {
            db.insert_transaction(&NewTransaction::new(
                "default",
                today,
                &format!("PIX ENVIADO PADARIA CENTRAL {}", i),
                -12.0,
            ))
            .unwrap();
        }
        db.insert_transaction(&NewTransaction::new("default", today, "NETFLIX.COM", -39.9))
            .unwrap();
        (db, cat)
    }

    #[test]
    fn test_suggest_rules_over_unclassified() {
        let (db, _) = seeded();
        let suggestor = PatternSuggestor::new(db, &ClusteringConfig::default());
        let suggestions = suggestor.suggest_rules("default").unwrap();
        assert_eq!(suggestions.len(), 1);
        assert_eq!(suggestions[0].pattern, "*PADARIA*CENTRAL*");
        assert_eq!(suggestions[0].transaction_count, 4);
        assert_eq!(suggestions[0].category_id, None);
        assert_eq!(suggestions[0].examples.len(), 3);
    }

    #[test]
    fn test_preview_pattern_counts() {
        let (db, _) = seeded();
        let suggestor = PatternSuggestor::new(db, &ClusteringConfig::default());
        let preview = suggestor
            .preview_pattern("default", "PADARIA", PatternKind::Contains, 2)
            .unwrap();
        assert_eq!(preview.scanned, 5);
        assert_eq!(preview.total_matches, 4);
        assert_eq!(preview.sample.len(), 2);
        assert_eq!(preview.by_category, vec![CategoryCount { category_id: None, count: 4 }]);

        assert!(suggestor
            .preview_pattern("default", "(unclosed", PatternKind::Regex, 5)
            .is_err());
    }

    #[test]
    fn test_find_similar_transactions() {
        let (db, _) = seeded();
        let suggestor = PatternSuggestor::new(db, &ClusteringConfig::default());
        let similar = suggestor
            .find_similar_transactions("default", "PIX ENVIADO PADARIA CENTRAL", 10)
            .unwrap();
        assert_eq!(similar.len(), 4);
        assert!(similar.iter().all(|s| (s.similarity - 1.0).abs() < 1e-9));
        assert!(suggestor
            .find_similar_transactions("default", "12 34", 10)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_process_clusters_creates_rule_once() {
        let (db, cat) = seeded();
        for tx in db.list_transactions(&TransactionFilter::new("default")).unwrap() {
            if tx.description.contains("PADARIA") {
                db.set_manual_category(tx.id, cat).unwrap();
            }
        }
        let suggestor = PatternSuggestor::new(db.clone(), &ClusteringConfig::default());

        let first = suggestor.process_clusters("default").unwrap();
        assert_eq!(first, ClusterProcessing { clusters_processed: 1, rules_created: 1 });

        let rules = db.list_rules("default", true).unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].source, RuleSource::Cluster);
        assert_eq!(rules[0].status, RuleStatus::Monitoring);
        assert_eq!(rules[0].category_id, Some(cat));

        let second = suggestor.process_clusters("default").unwrap();
        assert_eq!(second.rules_created, 0);
    }
}
