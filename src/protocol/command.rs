#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Ping,
    ConfigGet,
    ConfigSave,
    TableOpen,
    TableEntries,
    TableEdit,
    TableTranslate,
    TableCancel,
    TableSave,
    TableClose,
    TranslateText,
    Unknown,
}

impl From<&str> for Command {
    fn from(s: &str) -> Self {
        match s {
            "ping" => Command::Ping,
            "config.get" => Command::ConfigGet,
            "config.save" => Command::ConfigSave,
            "table.open" => Command::TableOpen,
            "table.entries" => Command::TableEntries,
            "table.edit" => Command::TableEdit,
            "table.translate" => Command::TableTranslate,
            "table.cancel" => Command::TableCancel,
            "table.save" => Command::TableSave,
            "table.close" => Command::TableClose,
            "translate.text" => Command::TranslateText,
            _ => Command::Unknown,
        }
    }
}
