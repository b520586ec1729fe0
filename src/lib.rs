extern crate bincode;
extern crate byteorder;
extern crate rand;
extern crate serde;
#[macro_use]
extern crate serde_derive;
extern crate siphasher;

mod entry;
pub mod external_map;
pub mod percentile;
