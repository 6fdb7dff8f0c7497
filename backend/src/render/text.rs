use super::{enveloped_body, RenderRequest, Renderer};
use crate::error::RenderError;
use crate::template::TemplateModel;
use async_trait::async_trait;
use common::model::options::{OutputFormat, OutputOptions};

/// Plain-text output straight from the substitution plan.
#[derive(Debug, Default, Clone)]
pub struct TextRenderer;

#[async_trait]
impl Renderer for TextRenderer {
    async fn render(&self, request: &RenderRequest) -> Result<Vec<u8>, RenderError> {
        enveloped_body(request)
    }

    fn supports(&self, template: &TemplateModel, options: &OutputOptions) -> Result<(), String> {
        if template.media_type().is_binary() {
            return Err(format!(
                "{} templates cannot be rendered as text locally",
                template.media_type().extension()
            ));
        }
        if options.format != OutputFormat::Txt {
            return Err(format!("text renderer cannot produce {:?}", options.format));
        }
        if options.password.is_some() {
            return Err("password protection needs the upstream renderer".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::{MediaType, TemplateOptions};
    use common::model::record::{CellValue, Record};
    use std::collections::BTreeMap;
    use std::sync::Arc;

    #[tokio::test]
    async fn renders_with_envelopes() {
        let template = TemplateModel::parse(
            b"Hello [name]".to_vec(),
            MediaType::Text,
            TemplateOptions {
                name: "greeting".into(),
                optional: vec![],
            },
        )
        .unwrap();
        let options = OutputOptions {
            format: OutputFormat::Txt,
            include_metadata: true,
            watermark: Some("COPY".into()),
            ..Default::default()
        };
        assert!(TextRenderer.supports(&template, &options).is_ok());

        let mut values = BTreeMap::new();
        values.insert("name".to_string(), CellValue::Text("Ana".into()));
        let request = RenderRequest::new(
            "b",
            Arc::new(template),
            Arc::new(options),
            Record::new(1, values),
        );
        let out = String::from_utf8(TextRenderer.render(&request).await.unwrap()).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert!(lines[0].starts_with("[meta:"));
        assert_eq!(lines[1], "Hello Ana");
        assert!(lines[2].starts_with("[wm:"));
    }
}
