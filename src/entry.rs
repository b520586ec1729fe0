/// A key-value record as serialized into a spill run.
#[derive(Serialize, Deserialize, Debug)]
pub struct Entry<T, U> {
    pub key: T,
    pub value: U,
}
