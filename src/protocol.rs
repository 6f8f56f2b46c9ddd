//! Wire text exchanged with clients. There is no framing: each formatted
//! value is written as-is and every read on the server side is one message.

use crate::history::Message;

pub const WELCOME: &str = "=== Bem-vindo ao Chat! Você é o primeiro aqui. ===\n";

pub const HISTORY_FOOTER: &str = "=== Fim do Histórico ===\n";

pub fn join_notice(identity: &str) -> String {
    format!("*** {} entrou no chat ***\n", identity)
}

pub fn leave_notice(identity: &str) -> String {
    format!("*** {} saiu do chat ***\n", identity)
}

pub fn history_header(count: usize) -> String {
    format!("=== Histórico de Mensagens (últimas {} mensagens) ===\n", count)
}

/// `[sender]: content\n`, keeping the content bytes untouched.
pub fn chat_line(message: &Message) -> Vec<u8> {
    let sender = message.sender();
    let content = message.content();

    let mut line = Vec::with_capacity(sender.len() + content.len() + 4);
    line.push(b'[');
    line.extend_from_slice(sender.as_bytes());
    line.extend_from_slice(b"]: ");
    line.extend_from_slice(content);
    line.push(b'\n');

    line
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notices() {
        assert_eq!(join_notice("10.0.0.1:5000"), "*** 10.0.0.1:5000 entrou no chat ***\n");
        assert_eq!(leave_notice("10.0.0.1:5000"), "*** 10.0.0.1:5000 saiu do chat ***\n");
    }

    #[test]
    fn header_counts_messages() {
        assert_eq!(
            history_header(3),
            "=== Histórico de Mensagens (últimas 3 mensagens) ===\n"
        );
    }

    #[test]
    fn chat_line_keeps_raw_chunk() {
        let msg = Message::new("127.0.0.1:4000", b"hello\n".to_vec());

        // trailing newline from the client is not stripped
        assert_eq!(chat_line(&msg), b"[127.0.0.1:4000]: hello\n\n".to_vec());
    }
}
