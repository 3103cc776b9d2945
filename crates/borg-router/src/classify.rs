use borg_core::{RoutingDecision, Tier};

/// Tunables for tier mapping. Weights are fixed; boundaries and the
/// confidence curve are configuration.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Scores below this map to SIMPLE.
    pub simple_boundary: f64,
    /// Scores below this (and ≥ `simple_boundary`) map to MEDIUM.
    pub medium_boundary: f64,
    /// Steepness of the confidence sigmoid over boundary distance.
    pub sigmoid_steepness: f64,
    /// Token estimates strictly above this force COMPLEX.
    pub max_tokens_force_complex: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            simple_boundary: 0.0,
            medium_boundary: 0.15,
            sigmoid_steepness: 3.0,
            max_tokens_force_complex: 2000,
        }
    }
}

// Dimension weights — must sum to 1.0 (checked by test).
const W_REASONING: f64 = 0.18;
const W_CODE: f64 = 0.15;
const W_SIMPLE: f64 = 0.12;
const W_MULTI_STEP: f64 = 0.12;
const W_TECHNICAL: f64 = 0.10;
const W_TOKENS: f64 = 0.08;
const W_CREATIVE: f64 = 0.05;
const W_QUESTION: f64 = 0.05;
const W_CONSTRAINT: f64 = 0.04;
const W_IMPERATIVE: f64 = 0.03;
const W_FORMAT: f64 = 0.03;
const W_REFERENCE: f64 = 0.02;
const W_DOMAIN: f64 = 0.02;
const W_NEGATION: f64 = 0.01;

const REASONING_MARKERS: &[&str] = &[
    "prove", "derive", "derivation", "deduce", "step by step", "therefore", "theorem", "lemma",
    "justify", "show that", "explain why", "why does", "rigorous", "formally",
];

const CODE_MARKERS: &[&str] = &[
    "```", "fn ", "def ", "class ", "impl ", "#include", "function(", "=> {", "async fn",
    "struct ", "select * from", "npm install", "cargo ", "import ", "pub fn", "traceback",
];

const SIMPLE_OPENERS: &[&str] = &[
    "what is", "what's", "who is", "who was", "when is", "when did", "where is", "define ",
    "how many", "capital of", "yes", "no ", "ok", "thanks", "thank you",
];

const MULTI_STEP_MARKERS: &[&str] = &[
    "first", "then", "next", "finally", "after that", "step 1", "step 2", "1.", "2.", "3.",
    "followed by",
];

const TECHNICAL_TERMS: &[&str] = &[
    "kubernetes", "docker", "container", "database", "latency", "throughput", "concurrency",
    "mutex", "scheduler", "microservice", "tcp", "dns", "tls", "kernel", "compiler", "cache",
    "distributed", "replication", "deadlock", "backpressure",
];

const CREATIVE_MARKERS: &[&str] = &[
    "story", "poem", "haiku", "brainstorm", "imagine", "creative", "lyrics", "fiction",
];

const CONSTRAINT_MARKERS: &[&str] = &[
    "at most", "at least", "no more than", "o(", "within a budget", "constraint", "must not",
    "exactly", "upper bound", "lower bound",
];

const IMPERATIVE_VERBS: &[&str] = &[
    "build", "create", "implement", "write", "design", "refactor", "develop", "generate",
];

const FORMAT_MARKERS: &[&str] = &["json", "yaml", "csv", "as a table", "markdown table", "xml"];

const REFERENCE_MARKERS: &[&str] = &[
    "above", "previous", "the docs", "earlier", "aforementioned", "as discussed",
    "you mentioned",
];

const DOMAIN_MARKERS: &[&str] = &[
    "quantum", "genomic", "fpga", "verilog", "bayesian", "transformer", "homomorphic",
    "phoneme", "raft consensus", "category theory",
];

const NEGATION_MARKERS: &[&str] = &["don't", "do not", "except", "avoid", "without", "never"];

/// The classifier. Stateless; `classify` is a pure function of
/// (config, text).
#[derive(Debug, Clone, Default)]
pub struct Router {
    config: RouterConfig,
}

impl Router {
    pub fn new(config: RouterConfig) -> Self {
        Self { config }
    }

    /// Classify one message. `system_text` (router enrichment context)
    /// contributes to the token estimate only.
    ///
    /// Never fails: an internal panic degrades to the documented
    /// MEDIUM-at-0.5 fallback.
    pub fn classify(&self, text: &str, system_text: Option<&str>) -> RoutingDecision {
        std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            self.classify_inner(text, system_text)
        }))
        .unwrap_or_else(|_| RoutingDecision {
            tier: Tier::Medium,
            model: Tier::Medium.model().to_string(),
            confidence: 0.5,
            signals: vec!["fallback:classifier-error".into()],
            estimated_tokens: 0,
            reasoning: "classifier error, defaulting to medium".into(),
        })
    }

    fn classify_inner(&self, text: &str, system_text: Option<&str>) -> RoutingDecision {
        let lower = text.to_lowercase();
        let estimated_tokens =
            (text.chars().count() + system_text.map_or(0, |s| s.chars().count())) / 4;

        // Override 1: very large inputs always go to the top tier (strict >).
        if estimated_tokens > self.config.max_tokens_force_complex {
            return decision(
                Tier::Complex,
                0.95,
                vec![format!("tokenCount:forced({estimated_tokens})")],
                estimated_tokens,
                "token estimate above force-complex cap".into(),
            );
        }

        // Override 2: two or more reasoning markers short-circuit the
        // weighted sum — derivations belong on the top tier.
        let reasoning_hits = count_hits(&lower, REASONING_MARKERS);
        if reasoning_hits >= 2 {
            return decision(
                Tier::Complex,
                0.9,
                vec![format!("reasoningMarkers:fast-path({reasoning_hits})")],
                estimated_tokens,
                "multiple reasoning markers".into(),
            );
        }

        let mut signals = Vec::new();
        let mut score = 0.0;

        let dim = |name: &str, weight: f64, raw: f64, signals: &mut Vec<String>| {
            if raw != 0.0 {
                signals.push(format!("{name}:{raw:+.2}"));
            }
            weight * raw
        };

        score += dim(
            "reasoningMarkers",
            W_REASONING,
            saturating(reasoning_hits, 0.5),
            &mut signals,
        );
        score += dim(
            "codePresence",
            W_CODE,
            if lower.contains("```") {
                1.0
            } else {
                saturating(count_hits(&lower, CODE_MARKERS), 0.4)
            },
            &mut signals,
        );
        score += dim(
            "simpleIndicators",
            W_SIMPLE,
            -simple_opener_score(&lower),
            &mut signals,
        );
        score += dim(
            "multiStepPatterns",
            W_MULTI_STEP,
            saturating(count_hits(&lower, MULTI_STEP_MARKERS), 0.5),
            &mut signals,
        );
        score += dim(
            "technicalTerms",
            W_TECHNICAL,
            saturating(count_hits(&lower, TECHNICAL_TERMS), 0.34),
            &mut signals,
        );
        score += dim(
            "tokenCount",
            W_TOKENS,
            token_score(estimated_tokens),
            &mut signals,
        );
        score += dim(
            "creativeMarkers",
            W_CREATIVE,
            saturating(count_hits(&lower, CREATIVE_MARKERS), 0.5),
            &mut signals,
        );
        score += dim(
            "questionComplexity",
            W_QUESTION,
            saturating(lower.matches('?').count().saturating_sub(1), 0.5),
            &mut signals,
        );
        score += dim(
            "constraintCount",
            W_CONSTRAINT,
            saturating(count_hits(&lower, CONSTRAINT_MARKERS), 0.5),
            &mut signals,
        );
        score += dim(
            "imperativeVerbs",
            W_IMPERATIVE,
            saturating(count_hits(&lower, IMPERATIVE_VERBS), 0.5),
            &mut signals,
        );
        score += dim(
            "outputFormat",
            W_FORMAT,
            if count_hits(&lower, FORMAT_MARKERS) > 0 {
                1.0
            } else {
                0.0
            },
            &mut signals,
        );
        score += dim(
            "referenceComplexity",
            W_REFERENCE,
            saturating(count_hits(&lower, REFERENCE_MARKERS), 0.5),
            &mut signals,
        );
        score += dim(
            "domainSpecificity",
            W_DOMAIN,
            if count_hits(&lower, DOMAIN_MARKERS) > 0 {
                1.0
            } else {
                0.0
            },
            &mut signals,
        );
        score += dim(
            "negationComplexity",
            W_NEGATION,
            saturating(count_hits(&lower, NEGATION_MARKERS), 0.5),
            &mut signals,
        );

        let tier = if score < self.config.simple_boundary {
            Tier::Simple
        } else if score < self.config.medium_boundary {
            Tier::Medium
        } else {
            Tier::Complex
        };

        let boundary_distance = (score - self.config.simple_boundary)
            .abs()
            .min((score - self.config.medium_boundary).abs());
        let confidence = sigmoid(boundary_distance * self.config.sigmoid_steepness);

        let reasoning = if signals.is_empty() {
            "no dimension matched, defaulting to medium".to_string()
        } else {
            format!("score {score:.3} from {} dimensions", signals.len())
        };

        decision(tier, confidence, signals, estimated_tokens, reasoning)
    }
}

fn decision(
    tier: Tier,
    confidence: f64,
    signals: Vec<String>,
    estimated_tokens: usize,
    reasoning: String,
) -> RoutingDecision {
    RoutingDecision {
        tier,
        model: tier.model().to_string(),
        confidence,
        signals,
        estimated_tokens,
        reasoning,
    }
}

fn count_hits(lower: &str, markers: &[&str]) -> usize {
    markers.iter().filter(|m| lower.contains(*m)).count()
}

/// `count` hits scaled by `step`, saturating at 1.0.
fn saturating(count: usize, step: f64) -> f64 {
    (count as f64 * step).min(1.0)
}

/// Full negative contribution only when the message both opens with a
/// factoid phrase and is short; long messages with a factoid opener still
/// count half.
fn simple_opener_score(lower: &str) -> f64 {
    let trimmed = lower.trim_start();
    let opener = SIMPLE_OPENERS.iter().any(|o| trimmed.starts_with(o));
    if !opener {
        0.0
    } else if trimmed.chars().count() <= 120 {
        1.0
    } else {
        0.5
    }
}

/// < 50 estimated tokens reads simple, > 500 reads complex, linear
/// in between.
fn token_score(tokens: usize) -> f64 {
    if tokens < 50 {
        -1.0
    } else if tokens > 500 {
        1.0
    } else {
        (tokens as f64 - 50.0) / 450.0 * 2.0 - 1.0
    }
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}
