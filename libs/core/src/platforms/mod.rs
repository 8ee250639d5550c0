pub mod mamacare;
pub mod partner;
pub mod webform;
pub mod whatsapp;

pub use mamacare::MamacareAdapter;
pub use partner::PartnerAdapter;
pub use webform::WebformAdapter;
pub use whatsapp::WhatsAppAdapter;
