// volley_prng: deterministic randomness shared by both peers and every
// spectator of a volley session.
//
// Lockstep only works if every observer draws the same pseudo-random values
// in the same order. Nothing random is ever transmitted; instead each
// observer derives its generators from the room identifier (`SessionSeed`)
// and consumes them in frame order.
//
// Module overview:
// - `rng.rs`:  `GameRng`, a xoshiro256++ generator with SplitMix64 seeding.
// - `seed.rs`: `SessionSeed` (room id → 64-bit seed) and `RngStream`, the
//              named sub-streams carved out of one seed (simulation, chat
//              placement per player side).
//
// **Critical constraint: determinism.** No floating point in the core
// generator, no platform-dependent hashing, no std `RandomState`.

pub mod rng;
pub mod seed;

pub use rng::GameRng;
pub use seed::{RngStream, SessionSeed};
