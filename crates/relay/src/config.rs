#[derive(Debug, Clone)]
pub struct RelayServerConfig {
    pub max_peers_per_room: usize,
    pub room_code_length: usize,
}

impl Default for RelayServerConfig {
    fn default() -> Self {
        Self {
            max_peers_per_room: 8,
            room_code_length: 6,
        }
    }
}
