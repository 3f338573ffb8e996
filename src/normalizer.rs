use crate::model::Schedule;
use std::collections::HashMap;

pub fn normalize_all(rows: &mut [Schedule], operators: &HashMap<String, String>) {
    for row in rows.iter_mut() {
        row.operator_name = operator_display_name(operators, row.operator_id.as_deref());
    }
}

pub fn operator_display_name(operators: &HashMap<String, String>, provider_id: Option<&str>) -> String {
    match provider_id.map(str::trim).filter(|id| !id.is_empty()) {
        Some(id) => operators
            .get(id)
            .cloned()
            .unwrap_or_else(|| format!("Proveedor #{}", id)),
        None => "Desconocido".to_string(),
    }
}
