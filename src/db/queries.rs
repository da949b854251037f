use super::{ProcedureRunner, SqlParam};
use crate::error::SyncError;
use crate::table::{Table, as_text};
use tracing::info;

const NOTIFICATION_RECIPIENTS_SQL: &str = "SELECT Destinatarios, DestinatariosCopia, \
     DestinatariosCopiaOculta, NombreOrigenNotificacion \
     FROM CorreosNotificaciones WHERE NombreOrigenNotificacion = @P1";

/// Addresses configured for notifications from one origin.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotificationRecipients {
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
}

impl NotificationRecipients {
    /// Merge every row of the recipients table. Cells hold `;` or `,`
    /// separated address lists.
    pub fn from_table(table: &Table) -> Self {
        let mut out = Self::default();
        for record in table.records() {
            let field = |name: &str| record.get(name).map(as_text).unwrap_or_default();
            out.to.extend(split_addresses(&field("Destinatarios")));
            out.cc.extend(split_addresses(&field("DestinatariosCopia")));
            out.bcc.extend(split_addresses(&field("DestinatariosCopiaOculta")));
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.to.is_empty() && self.cc.is_empty() && self.bcc.is_empty()
    }
}

/// Fetch the notification recipients registered for `origin`.
pub async fn notification_recipients<R: ProcedureRunner>(
    runner: &mut R,
    origin: &str,
) -> Result<Table, SyncError> {
    let table = runner
        .query(NOTIFICATION_RECIPIENTS_SQL, vec![SqlParam::from(origin)])
        .await?;
    info!(origin, rows = table.len(), "notification recipients loaded");
    Ok(table)
}

fn split_addresses(cell: &str) -> impl Iterator<Item = String> + '_ {
    cell.split([';', ','])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn recipients_are_split_and_merged() {
        let table = Table::from_parts(
            Some(vec![
                "Destinatarios".into(),
                "DestinatariosCopia".into(),
                "DestinatariosCopiaOculta".into(),
                "NombreOrigenNotificacion".into(),
            ]),
            vec![
                vec![json!("a@x.com; b@x.com"), json!(""), json!(null), json!("API")],
                vec![json!("c@x.com"), json!("d@x.com,e@x.com"), json!("f@x.com"), json!("API")],
            ],
        );
        let r = NotificationRecipients::from_table(&table);
        assert_eq!(r.to, ["a@x.com", "b@x.com", "c@x.com"]);
        assert_eq!(r.cc, ["d@x.com", "e@x.com"]);
        assert_eq!(r.bcc, ["f@x.com"]);
    }

    #[test]
    fn empty_table_has_no_recipients() {
        assert!(NotificationRecipients::from_table(&Table::empty()).is_empty());
    }
}
