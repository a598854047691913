pub struct Icons;

impl Icons {
    pub const KEY: &str = "🔑";
    pub const CHECK: &str = "✅";
    pub const WARN: &str = "⚠️";
    pub const INFO: &str = "ℹ️";
    pub const LINK: &str = "🔗";
    pub const MOD: &str = "📝";
    pub const DEL: &str = "🗑️";
    pub const DATABASE: &str = "🗄️";
    pub const PERSON: &str = "👤";
    pub const GROUP: &str = "👥";
    pub const EMPTY: &str = "∅";
}
