//! Human-friendly task slugs
//!
//! Tasks get an `adjective-noun` handle alongside their UUID so
//! operators can say `hal tasks show brave-otter` instead of pasting
//! identifiers.

use rand::Rng;

const ADJECTIVES: &[&str] = &[
    "amber", "bold", "brave", "brisk", "calm", "clever", "cosmic", "crisp",
    "daring", "deft", "eager", "fleet", "gentle", "happy", "keen", "lively",
    "lucid", "mellow", "nimble", "patient", "plucky", "proud", "quiet",
    "rapid", "sly", "solid", "spry", "stoic", "sturdy", "swift", "tidy",
    "vivid", "warm", "wise", "witty", "zesty",
];

const NOUNS: &[&str] = &[
    "badger", "bison", "crane", "dingo", "falcon", "ferret", "finch",
    "gecko", "heron", "ibex", "jackal", "koala", "lemur", "lynx", "macaw",
    "marmot", "marten", "moose", "newt", "ocelot", "osprey", "otter",
    "panda", "petrel", "plover", "puffin", "quokka", "raven", "seal",
    "shrew", "stoat", "swift", "tapir", "vole", "walrus", "wren",
];

/// Generate a random `adjective-noun` slug.
pub fn generate() -> String {
    let mut rng = rand::thread_rng();
    let adjective = ADJECTIVES[rng.gen_range(0..ADJECTIVES.len())];
    let noun = NOUNS[rng.gen_range(0..NOUNS.len())];
    format!("{adjective}-{noun}")
}

/// Generate a slug not present in `taken`, appending a numeric
/// discriminator once the plain combinations are exhausted.
pub fn generate_unique(taken: impl Fn(&str) -> bool) -> String {
    for _ in 0..16 {
        let slug = generate();
        if !taken(&slug) {
            return slug;
        }
    }
    let mut rng = rand::thread_rng();
    loop {
        let slug = format!("{}-{}", generate(), rng.gen_range(2..100));
        if !taken(&slug) {
            return slug;
        }
    }
}
